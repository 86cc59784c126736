//! Error types for the healing engines

use std::fmt;

/// Why a modification task was refused a place in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionRejection {
    /// A known task already carries this id
    DuplicateId { task_id: String },
    /// A pending or in-progress task already has the same type and scope
    DuplicateKind { existing_task_id: String },
    /// An active task already touches one of the target files
    FileConflict {
        existing_task_id: String,
        file: String,
    },
}

impl fmt::Display for AdmissionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionRejection::DuplicateId { task_id } => {
                write!(f, "a task with id {} already exists", task_id)
            }
            AdmissionRejection::DuplicateKind { existing_task_id } => write!(
                f,
                "task with the same type and scope is already queued or running ({})",
                existing_task_id
            ),
            AdmissionRejection::FileConflict {
                existing_task_id,
                file,
            } => write!(
                f,
                "target file {} is being modified by active task {}",
                file, existing_task_id
            ),
        }
    }
}

/// Engine-level errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine state lock poisoned: {0}")]
    StatePoisoned(&'static str),

    #[error("invalid pattern for recovery rule '{name}': {source}")]
    InvalidRulePattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("duplicate recovery rule name: {0}")]
    DuplicateRule(String),

    #[error("error event not found: {0}")]
    EventNotFound(String),

    #[error("recovery rule not found: {0}")]
    RuleNotFound(String),

    #[error("task rejected: {0}")]
    TaskRejected(AdmissionRejection),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Map a poisoned lock into an [`EngineError`] naming the structure
pub(crate) fn poisoned<T>(what: &'static str) -> impl FnOnce(T) -> EngineError {
    move |_| EngineError::StatePoisoned(what)
}
