//! Strategy table mapping each [`RecoveryAction`] to its handler

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::types::{ErrorEvent, RecoveryAction};
use crate::context::ControlContext;

/// Executes one compensating action.
///
/// `Ok(false)` and `Err(_)` both count as a failed action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, event: &ErrorEvent, ctx: &ControlContext) -> anyhow::Result<bool>;
}

/// Default handler: records the intent and reports success
struct LoggedAction(RecoveryAction);

#[async_trait]
impl ActionHandler for LoggedAction {
    async fn execute(&self, event: &ErrorEvent, _ctx: &ControlContext) -> anyhow::Result<bool> {
        tracing::info!(
            action = %self.0,
            component = %event.component,
            event_id = %event.id,
            "Executing recovery action"
        );
        Ok(true)
    }
}

/// Sets the sticky emergency flag
struct EmergencyModeAction;

#[async_trait]
impl ActionHandler for EmergencyModeAction {
    async fn execute(&self, event: &ErrorEvent, ctx: &ControlContext) -> anyhow::Result<bool> {
        if ctx.activate_emergency_mode() {
            tracing::warn!(event_id = %event.id, "Activating emergency mode");
        }
        Ok(true)
    }
}

/// Handler lookup for every recovery action
#[derive(Clone)]
pub struct ActionTable {
    handlers: HashMap<RecoveryAction, Arc<dyn ActionHandler>>,
}

impl ActionTable {
    /// A table with no handlers; every action fails until registered
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Logging handlers for every action, plus the emergency-mode switch
    pub fn with_defaults() -> Self {
        let mut table = Self::empty();
        for action in RecoveryAction::ALL {
            let handler: Arc<dyn ActionHandler> = match action {
                RecoveryAction::EmergencyMode => Arc::new(EmergencyModeAction),
                other => Arc::new(LoggedAction(other)),
            };
            table.handlers.insert(action, handler);
        }
        table
    }

    /// Replace the handler for one action
    pub fn register(&mut self, action: RecoveryAction, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action, handler);
    }

    pub fn with_handler(mut self, action: RecoveryAction, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(action, handler);
        self
    }

    /// Run an action, folding errors and missing handlers into `false`
    pub async fn run(
        &self,
        action: RecoveryAction,
        event: &ErrorEvent,
        ctx: &ControlContext,
    ) -> bool {
        let Some(handler) = self.handlers.get(&action) else {
            tracing::warn!(action = %action, "No handler registered for recovery action");
            return false;
        };

        match handler.execute(event, ctx).await {
            Ok(success) => success,
            Err(e) => {
                tracing::error!(
                    action = %action,
                    event_id = %event.id,
                    "Recovery action failed: {}",
                    e
                );
                false
            }
        }
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ErrorReport;
    use crate::recovery::types::{ErrorCategory, Severity};
    use chrono::Utc;

    struct Failing;

    #[async_trait]
    impl ActionHandler for Failing {
        async fn execute(
            &self,
            _event: &ErrorEvent,
            _ctx: &ControlContext,
        ) -> anyhow::Result<bool> {
            anyhow::bail!("service manager unreachable")
        }
    }

    fn event() -> ErrorEvent {
        ErrorEvent::new(
            ErrorReport::new("api", "crash", "fatal crash"),
            Severity::Critical,
            ErrorCategory::ProviderFailure,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_defaults_succeed_and_emergency_sets_flag() {
        let table = ActionTable::with_defaults();
        let ctx = ControlContext::new();

        assert!(table.run(RecoveryAction::ClearCache, &event(), &ctx).await);
        assert!(!ctx.is_emergency_mode_active());

        assert!(table.run(RecoveryAction::EmergencyMode, &event(), &ctx).await);
        assert!(ctx.is_emergency_mode_active());
    }

    #[tokio::test]
    async fn test_errors_and_missing_handlers_are_failures() {
        let ctx = ControlContext::new();
        let table =
            ActionTable::empty().with_handler(RecoveryAction::RestartService, Arc::new(Failing));

        assert!(!table.run(RecoveryAction::RestartService, &event(), &ctx).await);
        assert!(!table.run(RecoveryAction::ClearCache, &event(), &ctx).await);
    }
}
