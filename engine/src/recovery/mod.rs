//! Error classification and recovery

mod actions;
mod classifier;
mod engine;
mod rules;
mod types;

pub use actions::{ActionHandler, ActionTable};
pub use classifier::{classify_category, classify_severity};
pub use engine::{RecoveryEngine, RecoveryHandle, RecoveryOutcome, Reported};
pub use rules::{seed_rules, RecoveryRule, RuleRegistry, RuleSnapshot, RuleSpec};
pub use types::{ErrorCategory, ErrorEvent, ErrorSignature, RecoveryAction, Severity};
