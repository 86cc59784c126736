//! Wiring: one control context, both engines, the status facade and the
//! loop bodies, all sharing the same audit sink

use anyhow::Result;
use healing_engine::modification::{
    CommandVerifier, GitRollback, LoggedRollback, NoChecks, RollbackHandler, SimulatedExecutor,
    VerificationRunner,
};
use healing_engine::{
    ActionTable, AuditSink, ControlContext, ControlLoops, ModificationScheduler, RecoveryEngine,
    StatusFacade, Supervisor,
};
use std::sync::Arc;

use crate::config::{expand_path, ServerConfig, VerificationConfig};
use crate::inbox::{FanoutSink, InboxNotifier};
use crate::providers::JsonDirStatusProvider;
use crate::store::SqliteStore;

#[derive(Clone)]
pub struct Services {
    pub ctx: ControlContext,
    pub recovery: RecoveryEngine,
    pub scheduler: ModificationScheduler,
    pub facade: StatusFacade,
    pub loops: ControlLoops,
    pub store: SqliteStore,
}

fn verifier(config: &VerificationConfig) -> Arc<dyn VerificationRunner> {
    let Some((program, args)) = config.command.split_first() else {
        return Arc::new(NoChecks);
    };

    let mut verifier =
        CommandVerifier::new(program.clone(), args.to_vec()).with_timeout(config.timeout());
    if let Some(dir) = &config.working_dir {
        verifier = verifier.with_working_dir(expand_path(dir));
    }
    Arc::new(verifier)
}

fn rollback(config: &ServerConfig) -> Arc<dyn RollbackHandler> {
    match &config.rollback.git_repository {
        Some(repo) => Arc::new(GitRollback::new(expand_path(repo))),
        None => Arc::new(LoggedRollback),
    }
}

impl Services {
    pub fn build(config: &ServerConfig, store: SqliteStore) -> Result<Self> {
        let ctx = ControlContext::new();

        let mut fanout = FanoutSink::new().with(Arc::new(store.clone()));
        if config.notifications.enabled {
            fanout = fanout.with(Arc::new(InboxNotifier::new(config.inbox_path())));
        }
        let sink: Arc<dyn AuditSink> = Arc::new(fanout);

        let recovery = RecoveryEngine::new(
            config.engine.recovery.clone(),
            ctx.clone(),
            ActionTable::with_defaults(),
            sink.clone(),
        )?;

        let modification = config.engine.modification.clone();
        let scheduler = ModificationScheduler::builder(modification, ctx.clone())
            .executor(Arc::new(SimulatedExecutor::new()))
            .verifier(verifier(&config.verification))
            .rollback(rollback(config))
            .sink(sink.clone())
            .build();

        let mut facade = StatusFacade::new(recovery.clone(), scheduler.clone());
        if let Some(dir) = &config.status.directory {
            let providers =
                JsonDirStatusProvider::for_subsystems(&expand_path(dir), &config.status.subsystems);
            for provider in providers {
                facade = facade.with_provider(provider);
            }
        }

        let loops = ControlLoops::new(
            &config.engine,
            recovery.clone(),
            scheduler.clone(),
            facade.clone(),
            sink,
        )
        .with_signal_source(Arc::new(store.clone()));

        Ok(Self {
            ctx,
            recovery,
            scheduler,
            facade,
            loops,
            store,
        })
    }

    pub fn supervisor(&self, config: &ServerConfig) -> Supervisor {
        Supervisor::new(self.loops.clone(), config.engine.loops.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_command_runs_no_checks() {
        let task = healing_engine::ModificationTask::new(
            healing_engine::modification::ModificationType::BugFix,
            healing_engine::modification::ModificationScope::SingleFile,
            "noop",
            chrono::Utc::now(),
        )
        .with_targets(["src/lib.rs"]);

        let results = verifier(&VerificationConfig::default()).verify(&task).await.unwrap();
        assert!(healing_engine::modification::all_passed(&results));
    }

    #[tokio::test]
    async fn test_build_shares_one_context() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.notifications.inbox_path = dir.path().to_string_lossy().to_string();

        let services = Services::build(&config, SqliteStore::open_in_memory().unwrap()).unwrap();
        services.ctx.set_automation_enabled(false);
        assert!(!services.recovery.status().automation_enabled);
        assert!(!services.scheduler.status().automation_enabled);
    }
}
