// config.rs — renderer cvars and the per-frame configuration snapshot

use neo_common::cvar::{CvarContext, CvarFlags};

use crate::device::TextureFilter;

const RENDERER_BOOL: CvarFlags = CvarFlags::RENDERER.union(CvarFlags::BOOL);
const RENDERER_CHEAT: CvarFlags = RENDERER_BOOL.union(CvarFlags::CHEAT);

/// Register every back-end cvar with its default.
pub fn r_register(cvars: &mut CvarContext) {
    cvars.register(
        "r_framebufferFilter",
        "0",
        RENDERER_BOOL,
        "Image filter when using the framebuffer. 0 = Nearest, 1 = Linear",
    );
    cvars.register(
        "r_framebufferMaintAspect",
        "0",
        RENDERER_BOOL,
        "If rendering to a framebuffer and it's not the same aspect ratio as the window, maintain aspect",
    );
    cvars.register(
        "r_skipDynamicTextures",
        "0",
        RENDERER_CHEAT,
        "don't dynamically create textures",
    );
    cvars.register("r_skipDiffuse", "0", RENDERER_CHEAT, "use black for diffuse");
    cvars.register("r_skipSpecular", "0", RENDERER_CHEAT, "use black for specular");
    cvars.register("r_skipBump", "0", RENDERER_CHEAT, "uses a flat surface instead of the bump map");
    cvars.register(
        "r_skipRender",
        "0",
        RENDERER_CHEAT,
        "skip 3D rendering, but pass 2D",
    );
    cvars.register(
        "r_lockSurfaces",
        "0",
        RENDERER_CHEAT,
        "allow moving the view point without changing the composition of the scene",
    );
    cvars.register(
        "r_overbright",
        "1",
        CvarFlags::RENDERER | CvarFlags::ARCHIVE,
        "scale applied to diffuse light colour",
    );
    cvars.register(
        "r_speeds",
        "0",
        CvarFlags::RENDERER | CvarFlags::INTEGER,
        "print back-end counters every frame",
    );
}

/// Read-only snapshot of the renderer toggles, built once per frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackendConfig {
    pub framebuffer_filter: TextureFilter,
    pub framebuffer_maintain_aspect: bool,
    pub skip_dynamic_textures: bool,
    pub skip_diffuse: bool,
    pub skip_specular: bool,
    pub skip_bump: bool,
    pub skip_render: bool,
    pub lock_surfaces: bool,
    pub overbright: f32,
    pub speeds: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            framebuffer_filter: TextureFilter::Nearest,
            framebuffer_maintain_aspect: false,
            skip_dynamic_textures: false,
            skip_diffuse: false,
            skip_specular: false,
            skip_bump: false,
            skip_render: false,
            lock_surfaces: false,
            overbright: 1.0,
            speeds: false,
        }
    }
}

impl BackendConfig {
    pub fn from_cvars(cvars: &CvarContext) -> Self {
        let overbright = match cvars.find_var("r_overbright") {
            Some(var) => var.value,
            None => 1.0,
        };
        Self {
            framebuffer_filter: TextureFilter::from_cvar(cvars.variable_integer("r_framebufferFilter")),
            framebuffer_maintain_aspect: cvars.variable_bool("r_framebufferMaintAspect"),
            skip_dynamic_textures: cvars.variable_bool("r_skipDynamicTextures"),
            skip_diffuse: cvars.variable_bool("r_skipDiffuse"),
            skip_specular: cvars.variable_bool("r_skipSpecular"),
            skip_bump: cvars.variable_bool("r_skipBump"),
            skip_render: cvars.variable_bool("r_skipRender"),
            lock_surfaces: cvars.variable_bool("r_lockSurfaces"),
            overbright,
            speeds: cvars.variable_integer("r_speeds") != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_defaults_match_default_snapshot() {
        let mut cvars = CvarContext::new();
        r_register(&mut cvars);
        assert_eq!(BackendConfig::from_cvars(&cvars), BackendConfig::default());
    }

    #[test]
    fn test_snapshot_reads_changes() {
        let mut cvars = CvarContext::new();
        r_register(&mut cvars);
        cvars.set("r_framebufferFilter", "1");
        cvars.set("r_skipBump", "1");
        cvars.set("r_lockSurfaces", "1");
        cvars.set_value("r_overbright", 2.0);
        cvars.set("r_speeds", "1");

        let config = BackendConfig::from_cvars(&cvars);
        assert_eq!(config.framebuffer_filter, TextureFilter::Linear);
        assert!(config.skip_bump);
        assert!(config.lock_surfaces);
        assert!(!config.skip_diffuse);
        assert_eq!(config.overbright, 2.0);
        assert!(config.speeds);
    }

    #[test]
    fn test_bool_cvars_normalised() {
        let mut cvars = CvarContext::new();
        r_register(&mut cvars);
        cvars.set("r_skipRender", "5");
        assert_eq!(cvars.variable_string("r_skipRender"), "1");
        assert!(BackendConfig::from_cvars(&cvars).skip_render);
    }

    #[test]
    fn test_unregistered_context_uses_defaults() {
        let cvars = CvarContext::new();
        assert_eq!(BackendConfig::from_cvars(&cvars), BackendConfig::default());
    }

    #[test]
    fn test_renderer_cvars_flagged() {
        let mut cvars = CvarContext::new();
        r_register(&mut cvars);
        for name in ["r_framebufferFilter", "r_skipDiffuse", "r_overbright", "r_speeds"] {
            let var = cvars.find_var(name).unwrap();
            assert!(var.flags.contains(CvarFlags::RENDERER), "{name}");
        }
        assert!(cvars.find_var("r_overbright").unwrap().flags.contains(CvarFlags::ARCHIVE));
    }
}
