//! Self-modification task pipeline

mod executor;
pub mod generator;
mod rollback;
mod safety;
mod scheduler;
mod team;
mod types;
mod verify;

pub use executor::{
    task_brief, Collaborator, CollaborativeExecutor, SimulatedExecutor, TaskExecutor, Turn,
    TurnOutcome,
};
pub use generator::TaskGenerator;
pub use rollback::{GitRollback, LoggedRollback, RollbackHandler};
pub use safety::{HostLoad, ResourceProbe, SafetyBlock, SysinfoProbe};
pub use scheduler::{ModificationScheduler, SchedulerBuilder, TaskHandle, TypeOutcomeStats};
pub use team::{agent_capabilities, AgentCapability, ExecutorTeam};
pub use types::{ModificationScope, ModificationTask, ModificationType, TaskStatus, TaskSummary};
pub use verify::{
    all_passed, CommandVerifier, NoChecks, TestResults, VerificationRunner, GENERAL_CHECK,
};
