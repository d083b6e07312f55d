// common.rs — console printing and one-shot diagnostics shared by the renderer
//
// Output goes through the `log` facade so the host decides where it lands.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Log target for console output.
pub const DISTNAME: &str = "neo";

// ============================================================
// com_printf / com_warning
// ============================================================

/// General-purpose console print.
pub fn com_printf(msg: &str) {
    log::info!(target: DISTNAME, "{}", msg.trim_end());
}

/// Warning print.
pub fn com_warning(msg: &str) {
    log::warn!(target: DISTNAME, "{}", msg.trim_end());
}

// ============================================================
// Diagnostic sinks
// ============================================================

/// Receives anomalies reported by subsystems that must not decide logging
/// policy themselves.
pub trait DiagnosticSink {
    /// Report a condition. `key` identifies the kind of anomaly, `message` is
    /// the human readable text.
    fn report(&self, key: &'static str, message: &str);
}

/// Logs each distinct diagnostic key once per sink; repeats are counted but
/// not logged.
#[derive(Default)]
pub struct WarnOnce {
    seen: Mutex<HashSet<&'static str>>,
    suppressed: Mutex<u64>,
}

impl WarnOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reports swallowed because their key was already logged.
    pub fn suppressed(&self) -> u64 {
        *self.suppressed.lock()
    }

    /// Whether `key` has been logged.
    pub fn has_reported(&self, key: &str) -> bool {
        self.seen.lock().contains(key)
    }
}

impl DiagnosticSink for WarnOnce {
    fn report(&self, key: &'static str, message: &str) {
        if self.seen.lock().insert(key) {
            com_warning(message);
        } else {
            *self.suppressed.lock() += 1;
        }
    }
}

// ============================================================
// Tests
// ============================================================
