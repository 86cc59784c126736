//! Process-wide control flags shared by both engines

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Control flags handed to the recovery engine and the task scheduler.
///
/// Clones share the same flags.
#[derive(Debug, Clone)]
pub struct ControlContext {
    emergency_mode: Arc<AtomicBool>,
    automation_enabled: Arc<AtomicBool>,
}

impl ControlContext {
    pub fn new() -> Self {
        Self {
            emergency_mode: Arc::new(AtomicBool::new(false)),
            automation_enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_emergency_mode_active(&self) -> bool {
        self.emergency_mode.load(Ordering::SeqCst)
    }

    /// Enter emergency mode. Returns true if the flag was newly set.
    pub fn activate_emergency_mode(&self) -> bool {
        !self.emergency_mode.swap(true, Ordering::SeqCst)
    }

    /// Leave emergency mode (operator action). Returns true if it was active.
    pub fn clear_emergency_mode(&self) -> bool {
        self.emergency_mode.swap(false, Ordering::SeqCst)
    }

    pub fn automation_enabled(&self) -> bool {
        self.automation_enabled.load(Ordering::SeqCst)
    }

    pub fn set_automation_enabled(&self, enabled: bool) {
        self.automation_enabled.store(enabled, Ordering::SeqCst);
    }
}

impl Default for ControlContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emergency_flag_is_sticky_and_shared() {
        let ctx = ControlContext::new();
        let other = ctx.clone();

        assert!(!ctx.is_emergency_mode_active());
        assert!(other.activate_emergency_mode());
        assert!(!other.activate_emergency_mode());
        assert!(ctx.is_emergency_mode_active());

        assert!(ctx.clear_emergency_mode());
        assert!(!other.is_emergency_mode_active());
        assert!(!ctx.clear_emergency_mode());
    }

    #[test]
    fn test_automation_toggle() {
        let ctx = ControlContext::default();
        assert!(ctx.automation_enabled());
        ctx.set_automation_enabled(false);
        assert!(!ctx.clone().automation_enabled());
    }
}
