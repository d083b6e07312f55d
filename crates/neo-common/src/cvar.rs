// cvar.rs — console variables
//
// Renderer toggles live here; the back end never reads them directly but
// takes a per-frame snapshot built from a CvarContext.

use std::collections::HashMap;

use bitflags::bitflags;

bitflags! {
    /// Cvar behaviour flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CvarFlags: u32 {
        /// Saved to the config file.
        const ARCHIVE  = 0x0001;
        /// Owned by the renderer.
        const RENDERER = 0x0008;
        /// Value is normalised to "0" / "1".
        const BOOL     = 0x0010;
        /// Value is truncated to an integer.
        const INTEGER  = 0x0020;
        /// Debugging aid; not meant for release configs.
        const CHEAT    = 0x0040;
    }
}

/// A console variable.
#[derive(Clone, Debug)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub flags: CvarFlags,
    pub value: f32,
    pub description: &'static str,
}

impl Cvar {
    pub fn as_bool(&self) -> bool {
        self.value != 0.0
    }

    pub fn as_integer(&self) -> i32 {
        self.value as i32
    }
}

/// Normalise a value according to the type flags.
fn normalize(value: &str, flags: CvarFlags) -> (String, f32) {
    let parsed = value.trim().parse::<f32>().unwrap_or(0.0);
    if flags.contains(CvarFlags::BOOL) {
        let b = parsed != 0.0;
        (if b { "1" } else { "0" }.to_string(), if b { 1.0 } else { 0.0 })
    } else if flags.contains(CvarFlags::INTEGER) {
        let i = parsed as i32;
        (i.to_string(), i as f32)
    } else {
        (value.to_string(), parsed)
    }
}

/// The full cvar system context.
#[derive(Default)]
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    cvar_index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    /// Get the floating-point value of a cvar. Returns 0 if not found.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |var| var.value)
    }

    /// Get the string value of a cvar. Returns "" if not found.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |var| var.string.as_str())
    }

    pub fn variable_bool(&self, name: &str) -> bool {
        self.find_var(name).is_some_and(Cvar::as_bool)
    }

    pub fn variable_integer(&self, name: &str) -> i32 {
        self.find_var(name).map_or(0, Cvar::as_integer)
    }

    /// Get or create a cvar. An existing cvar keeps its value; flags are OR'd in.
    pub fn register(
        &mut self,
        name: &str,
        value: &str,
        flags: CvarFlags,
        description: &'static str,
    ) -> usize {
        if let Some(&idx) = self.cvar_index.get(name) {
            let var = &mut self.cvar_vars[idx];
            var.flags |= flags;
            if var.description.is_empty() {
                var.description = description;
            }
            // re-normalise in case a type flag was just added
            let (string, parsed) = normalize(&var.string, var.flags);
            var.string = string;
            var.value = parsed;
            return idx;
        }

        let (string, parsed) = normalize(value, flags);
        let idx = self.cvar_vars.len();
        self.cvar_vars.push(Cvar {
            name: name.to_string(),
            string,
            flags,
            value: parsed,
            description,
        });
        self.cvar_index.insert(name.to_string(), idx);
        idx
    }

    /// Set a cvar value, creating it with no flags if it does not exist.
    pub fn set(&mut self, name: &str, value: &str) -> usize {
        let Some(&idx) = self.cvar_index.get(name) else {
            return self.register(name, value, CvarFlags::empty(), "");
        };

        let var = &mut self.cvar_vars[idx];
        let (string, parsed) = normalize(value, var.flags);
        var.string = string;
        var.value = parsed;
        idx
    }

    /// Set a cvar from a float value.
    pub fn set_value(&mut self, name: &str, value: f32) -> usize {
        let val_str = if value == (value as i32) as f32 {
            format!("{}", value as i32)
        } else {
            format!("{}", value)
        };
        self.set(name, &val_str)
    }
}

// ============================================================
// Tests
// ============================================================
