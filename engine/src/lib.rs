//! Self-healing engines
//!
//! Two engines built on the same pattern of classification, admission and
//! bounded detached execution:
//!
//! - [`recovery::RecoveryEngine`] classifies error signals, merges them by
//!   signature, and runs matching recovery rules under cooldown and
//!   success-rate limits.
//! - [`modification::ModificationScheduler`] queues self-modification tasks,
//!   admits them by priority under a concurrency cap with safety checks, and
//!   verifies or rolls back the result.
//!
//! [`runtime::Supervisor`] drives both from polling loops and
//! [`status::StatusFacade`] aggregates their status.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use healing_engine::{
//!     ActionTable, ControlContext, EngineConfig, ErrorReport, ModificationScheduler, NullSink,
//!     RecoveryEngine,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let ctx = ControlContext::new();
//! let sink = Arc::new(NullSink);
//!
//! let recovery = RecoveryEngine::new(
//!     config.recovery.clone(),
//!     ctx.clone(),
//!     ActionTable::default(),
//!     sink.clone(),
//! )?;
//! let _scheduler = ModificationScheduler::builder(config.modification.clone(), ctx)
//!     .sink(sink)
//!     .build();
//!
//! let reported = recovery
//!     .report(ErrorReport::new("redis", "cache_error", "cache eviction error"))
//!     .await?;
//! if let Some(handle) = reported.recovery {
//!     let outcome = handle.wait().await;
//!     println!("{:?}", outcome);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod modification;
pub mod ports;
pub mod recovery;
pub mod runtime;
pub mod status;

pub use config::EngineConfig;
pub use context::ControlContext;
pub use error::{AdmissionRejection, EngineError, EngineResult};
pub use modification::{ModificationScheduler, ModificationTask, TaskGenerator};
pub use ports::{
    AuditRecord, AuditSink, ErrorReport, NullSink, RetentionTier, SignalSource, StatusProvider,
    StatusSnapshot,
};
pub use recovery::{ActionTable, RecoveryEngine};
pub use runtime::{ControlLoops, Supervisor};
pub use status::StatusFacade;
