//! Modification task scheduler
//!
//! Tasks enter through [`ModificationScheduler::submit`], which enforces the
//! admission invariants (one open task per type and scope, no target-file
//! overlap with an active task). [`ModificationScheduler::dispatch_pending`]
//! moves the best pending tasks into execution, bounded by
//! `max_concurrent_modifications`, and each admitted task runs as its own
//! tokio task: execute, verify, then complete or fail and roll back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use super::executor::{SimulatedExecutor, TaskExecutor};
use super::rollback::{LoggedRollback, RollbackHandler};
use super::safety::{self, HostLoad, ResourceProbe, SysinfoProbe};
use super::team::{agent_capabilities, ExecutorTeam};
use super::types::{ModificationTask, ModificationType, TaskStatus};
use super::verify::{all_passed, NoChecks, TestResults, VerificationRunner};
use crate::config::ModificationConfig;
use crate::context::ControlContext;
use crate::error::{poisoned, AdmissionRejection, EngineError, EngineResult};
use crate::ports::{record_quietly, AuditRecord, AuditSink, NullSink, RetentionTier};
use crate::status::SelfModificationStatus;

/// Handle on a running task
#[derive(Debug)]
pub struct TaskHandle {
    pub task_id: String,
    handle: JoinHandle<TaskStatus>,
}

impl TaskHandle {
    /// Wait for the terminal status; `None` if the task was aborted
    pub async fn wait(self) -> Option<TaskStatus> {
        self.handle.await.ok()
    }
}

/// Outcome counts for one task type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeOutcomeStats {
    pub completed: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub mean_duration_secs: Option<f64>,
}

impl TypeOutcomeStats {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.rolled_back
    }

    pub fn success_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.completed as f64 / total as f64),
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<ModificationTask>,
    active: HashMap<String, ModificationTask>,
    history: Vec<ModificationTask>,
}

impl SchedulerState {
    fn check_admission(&self, task: &ModificationTask) -> Result<(), AdmissionRejection> {
        if self
            .queue
            .iter()
            .chain(self.active.values())
            .chain(self.history.iter())
            .any(|existing| existing.id == task.id)
        {
            return Err(AdmissionRejection::DuplicateId {
                task_id: task.id.clone(),
            });
        }

        if let Some(existing) = self
            .queue
            .iter()
            .chain(self.active.values())
            .find(|existing| existing.status.is_open() && existing.same_kind(task))
        {
            return Err(AdmissionRejection::DuplicateKind {
                existing_task_id: existing.id.clone(),
            });
        }

        for active in self.active.values() {
            if let Some(file) = task.shared_target(active) {
                return Err(AdmissionRejection::FileConflict {
                    existing_task_id: active.id.clone(),
                    file: file.to_string(),
                });
            }
        }

        Ok(())
    }
}

struct Inner {
    config: ModificationConfig,
    ctx: ControlContext,
    executor: Arc<dyn TaskExecutor>,
    verifier: Arc<dyn VerificationRunner>,
    rollback: Arc<dyn RollbackHandler>,
    probe: Arc<dyn ResourceProbe>,
    sink: Arc<dyn AuditSink>,
    state: Mutex<SchedulerState>,
}

/// Builder for [`ModificationScheduler`]
pub struct SchedulerBuilder {
    config: ModificationConfig,
    ctx: ControlContext,
    executor: Option<Arc<dyn TaskExecutor>>,
    verifier: Option<Arc<dyn VerificationRunner>>,
    rollback: Option<Arc<dyn RollbackHandler>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    sink: Option<Arc<dyn AuditSink>>,
}

impl SchedulerBuilder {
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn VerificationRunner>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn rollback(mut self, rollback: Arc<dyn RollbackHandler>) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> ModificationScheduler {
        ModificationScheduler {
            inner: Arc::new(Inner {
                config: self.config,
                ctx: self.ctx,
                executor: self
                    .executor
                    .unwrap_or_else(|| Arc::new(SimulatedExecutor::new())),
                verifier: self.verifier.unwrap_or_else(|| Arc::new(NoChecks)),
                rollback: self.rollback.unwrap_or_else(|| Arc::new(LoggedRollback)),
                probe: self.probe.unwrap_or_else(|| Arc::new(SysinfoProbe::new())),
                sink: self.sink.unwrap_or_else(|| Arc::new(NullSink)),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }
}

/// Priority queue and bounded executor for modification tasks
#[derive(Clone)]
pub struct ModificationScheduler {
    inner: Arc<Inner>,
}

impl ModificationScheduler {
    pub fn builder(config: ModificationConfig, ctx: ControlContext) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            ctx,
            executor: None,
            verifier: None,
            rollback: None,
            probe: None,
            sink: None,
        }
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, SchedulerState>> {
        self.inner.state.lock().map_err(poisoned("scheduler state"))
    }

    /// Panic while holding the state lock so later locks fail
    #[cfg(test)]
    pub(crate) fn poison_state(&self) {
        let inner = self.inner.clone();
        let _ = std::thread::spawn(move || {
            let _state = inner.state.lock();
            panic!("scheduler state poisoned for test");
        })
        .join();
    }

    pub fn config(&self) -> &ModificationConfig {
        &self.inner.config
    }

    /// Queue a task after checking the admission invariants
    pub async fn submit(&self, mut task: ModificationTask) -> EngineResult<String> {
        task.status = TaskStatus::Pending;
        {
            let mut state = self.lock()?;
            if let Err(rejection) = state.check_admission(&task) {
                tracing::debug!(task_id = %task.id, "Task rejected: {}", rejection);
                return Err(EngineError::TaskRejected(rejection));
            }
            state.queue.push(task.clone());
        }

        tracing::info!(
            task_id = %task.id,
            task_type = task.task_type.as_str(),
            priority = task.priority,
            "Modification task queued"
        );

        record_quietly(
            &*self.inner.sink,
            AuditRecord::new(
                "modification_task_generated",
                RetentionTier::LongTerm,
                json!({ "task": task }),
            ),
        )
        .await;

        Ok(task.id)
    }

    /// Submit every candidate, dropping the ones that fail admission
    pub async fn submit_all(&self, tasks: Vec<ModificationTask>) -> EngineResult<Vec<String>> {
        let mut accepted = Vec::new();
        for task in tasks {
            match self.submit(task).await {
                Ok(id) => accepted.push(id),
                Err(EngineError::TaskRejected(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(accepted)
    }

    async fn sample_load(&self) -> Option<HostLoad> {
        match self.inner.probe.sample().await {
            Ok(load) => Some(load),
            Err(e) => {
                tracing::warn!("Resource probe failed, skipping resource check: {}", e);
                None
            }
        }
    }

    /// Admit pending tasks in (priority, created_at) order up to the
    /// concurrency cap and start them.
    ///
    /// A task blocked by the safety check is marked failed and still uses
    /// up its slot for this round.
    pub async fn dispatch_pending(&self) -> EngineResult<Vec<TaskHandle>> {
        if !self.inner.ctx.automation_enabled() {
            return Ok(Vec::new());
        }

        {
            let state = self.lock()?;
            if state.queue.is_empty()
                || state.active.len() >= self.inner.config.max_concurrent_modifications
            {
                return Ok(Vec::new());
            }
        }

        let load = if self.inner.config.safety_checks_enabled {
            self.sample_load().await
        } else {
            None
        };
        let emergency = self.inner.ctx.is_emergency_mode_active();
        let now = Utc::now();

        let mut admitted = Vec::new();
        let mut blocked = Vec::new();
        {
            let mut guard = self.lock()?;
            let state = &mut *guard;

            let free = self
                .inner
                .config
                .max_concurrent_modifications
                .saturating_sub(state.active.len());
            state
                .queue
                .sort_by(|a, b| (a.priority, a.created_at).cmp(&(b.priority, b.created_at)));
            let take = free.min(state.queue.len());
            let batch: Vec<ModificationTask> = state.queue.drain(..take).collect();

            for mut task in batch {
                if self.inner.config.safety_checks_enabled {
                    if let Err(block) = safety::check(
                        &task,
                        state.active.values(),
                        load,
                        emergency,
                        &self.inner.config,
                    ) {
                        tracing::warn!(task_id = %task.id, "Task failed safety checks: {}", block);
                        task.status = TaskStatus::Failed;
                        task.metadata
                            .insert("safety_block".to_string(), block.to_string().into());
                        state.history.push(task.clone());
                        blocked.push(task);
                        continue;
                    }
                }

                task.status = TaskStatus::InProgress;
                task.started_at = Some(now);
                task.assigned_team = Some(ExecutorTeam::for_task(task.task_type));
                state.active.insert(task.id.clone(), task.clone());
                admitted.push(task);
            }
        }

        for task in blocked {
            self.record_completion(&task).await;
        }

        let handles = admitted
            .into_iter()
            .map(|task| {
                let scheduler = self.clone();
                let task_id = task.id.clone();
                let handle = tokio::spawn(async move { scheduler.run_task(task).await });
                TaskHandle { task_id, handle }
            })
            .collect();

        Ok(handles)
    }

    async fn run_task(&self, mut task: ModificationTask) -> TaskStatus {
        tracing::info!(
            task_id = %task.id,
            description = %task.description,
            "Executing modification task"
        );

        let executed = match tokio::time::timeout(
            self.inner.config.execution_timeout(),
            self.inner.executor.execute(&task),
        )
        .await
        {
            Ok(Ok(success)) => success,
            Ok(Err(e)) => {
                tracing::error!(task_id = %task.id, "Executor error: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!(task_id = %task.id, "Task execution timed out");
                false
            }
        };

        let (mut status, reason) = if executed {
            let results = match self.inner.verifier.verify(&task).await {
                Ok(results) => results,
                Err(e) => {
                    tracing::error!(task_id = %task.id, "Error verifying modifications: {}", e);
                    TestResults::from([("verification".to_string(), false)])
                }
            };
            let passed = all_passed(&results);
            task.test_results = results;
            if passed {
                (TaskStatus::Completed, None)
            } else {
                (TaskStatus::Failed, Some("verification_failed"))
            }
        } else {
            (TaskStatus::Failed, Some("execution_failed"))
        };

        if let (TaskStatus::Failed, Some(reason)) = (status, reason) {
            if self.inner.config.auto_rollback_on_failure {
                status = self.roll_back(&task, reason).await;
            }
        }

        let finished = Utc::now();
        task.status = status;
        task.actual_duration_secs = task
            .started_at
            .map(|started| (finished - started).num_milliseconds() as f64 / 1000.0);

        match status {
            TaskStatus::Completed => tracing::info!(
                task_id = %task.id,
                "Task completed successfully"
            ),
            _ => tracing::warn!(
                task_id = %task.id,
                status = status.as_str(),
                "Task did not complete"
            ),
        }

        match self.lock() {
            Ok(mut state) => {
                state.active.remove(&task.id);
                state.history.push(task.clone());
            }
            Err(e) => tracing::error!(task_id = %task.id, "Failed to record task outcome: {}", e),
        }

        self.record_completion(&task).await;
        status
    }

    async fn roll_back(&self, task: &ModificationTask, reason: &str) -> TaskStatus {
        tracing::warn!(task_id = %task.id, reason, "Rolling back modifications");

        match self.inner.rollback.rollback(task).await {
            Ok(()) => {
                record_quietly(
                    &*self.inner.sink,
                    AuditRecord::new(
                        "modification_rollback",
                        RetentionTier::Analytics,
                        json!({ "task_id": task.id, "reason": reason }),
                    ),
                )
                .await;
                TaskStatus::RolledBack
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, "Error rolling back modifications: {}", e);
                record_quietly(
                    &*self.inner.sink,
                    AuditRecord::new(
                        "modification_rollback_failed",
                        RetentionTier::Analytics,
                        json!({ "task_id": task.id, "reason": reason, "error": e.to_string() }),
                    ),
                )
                .await;
                TaskStatus::Failed
            }
        }
    }

    async fn record_completion(&self, task: &ModificationTask) {
        record_quietly(
            &*self.inner.sink,
            AuditRecord::new(
                "modification_task_completed",
                RetentionTier::LongTerm,
                json!({ "task": task }),
            ),
        )
        .await;
    }

    /// Every known task: queued, active, then history
    pub fn tasks(&self) -> EngineResult<Vec<ModificationTask>> {
        let state = self.lock()?;
        let mut active: Vec<ModificationTask> = state.active.values().cloned().collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(state
            .queue
            .iter()
            .cloned()
            .chain(active)
            .chain(state.history.iter().cloned())
            .collect())
    }

    pub fn task(&self, id: &str) -> EngineResult<ModificationTask> {
        let state = self.lock()?;
        state
            .queue
            .iter()
            .chain(state.active.values())
            .chain(state.history.iter())
            .find(|task| task.id == id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound(id.to_string()))
    }

    pub fn history(&self) -> EngineResult<Vec<ModificationTask>> {
        Ok(self.lock()?.history.clone())
    }

    /// Outcome counts and mean duration per task type, from history
    pub fn outcome_stats(&self) -> EngineResult<BTreeMap<ModificationType, TypeOutcomeStats>> {
        let state = self.lock()?;
        let mut stats: BTreeMap<ModificationType, TypeOutcomeStats> = BTreeMap::new();
        let mut durations: BTreeMap<ModificationType, Vec<f64>> = BTreeMap::new();

        for task in &state.history {
            let entry = stats.entry(task.task_type).or_default();
            match task.status {
                TaskStatus::Completed => entry.completed += 1,
                TaskStatus::RolledBack => entry.rolled_back += 1,
                TaskStatus::Failed => entry.failed += 1,
                TaskStatus::Pending | TaskStatus::InProgress => {}
            }
            if let Some(duration) = task.actual_duration_secs {
                durations.entry(task.task_type).or_default().push(duration);
            }
        }

        for (task_type, values) in durations {
            if let Some(entry) = stats.get_mut(&task_type) {
                entry.mean_duration_secs = Some(values.iter().sum::<f64>() / values.len() as f64);
            }
        }

        Ok(stats)
    }

    /// Status snapshot for the orchestrator; degraded instead of failing
    pub fn status(&self) -> SelfModificationStatus {
        let capabilities: BTreeMap<String, Vec<String>> = agent_capabilities()
            .into_iter()
            .map(|(key, capability)| (key, capability.specializations))
            .collect();

        let mut status = SelfModificationStatus {
            executor: self.inner.executor.name().to_string(),
            agents_initialized: self.inner.executor.agent_count(),
            active_tasks: 0,
            queued_tasks: 0,
            completed_tasks: 0,
            safety_checks_enabled: self.inner.config.safety_checks_enabled,
            automation_enabled: self.inner.ctx.automation_enabled(),
            recent_tasks: Vec::new(),
            agent_capabilities: capabilities,
            system_learning_enabled: true,
            degraded: None,
        };

        let state = match self.lock() {
            Ok(state) => state,
            Err(e) => {
                status.degraded = Some(e.to_string());
                return status;
            }
        };

        let mut recent: Vec<&ModificationTask> =
            state.history.iter().chain(state.active.values()).collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        status.active_tasks = state.active.len();
        status.queued_tasks = state.queue.len();
        status.completed_tasks = state
            .history
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .count();
        status.recent_tasks = recent.into_iter().take(10).map(|t| t.summary()).collect();
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modification::types::ModificationScope;
    use async_trait::async_trait;

    struct Calm;

    #[async_trait]
    impl ResourceProbe for Calm {
        async fn sample(&self) -> anyhow::Result<HostLoad> {
            Ok(HostLoad {
                cpu_percent: 5.0,
                memory_percent: 20.0,
            })
        }
    }

    struct Always(bool);

    #[async_trait]
    impl TaskExecutor for Always {
        fn name(&self) -> &str {
            "always"
        }

        async fn execute(&self, _task: &ModificationTask) -> anyhow::Result<bool> {
            Ok(self.0)
        }
    }

    fn scheduler(success: bool) -> ModificationScheduler {
        ModificationScheduler::builder(ModificationConfig::default(), ControlContext::new())
            .executor(Arc::new(Always(success)))
            .probe(Arc::new(Calm))
            .build()
    }

    fn task(task_type: ModificationType, files: &[&str]) -> ModificationTask {
        ModificationTask::new(task_type, ModificationScope::Module, "t", Utc::now())
            .with_targets(files.iter().copied())
    }

    #[tokio::test]
    async fn test_duplicate_kind_rejected() {
        let scheduler = scheduler(true);
        scheduler
            .submit(task(ModificationType::BugFix, &["a.rs"]))
            .await
            .unwrap();

        let err = scheduler
            .submit(task(ModificationType::BugFix, &["b.rs"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::TaskRejected(AdmissionRejection::DuplicateKind { .. })
        ));
        assert_eq!(scheduler.status().queued_tasks, 1);
    }

    #[tokio::test]
    async fn test_completed_task_lands_in_history() {
        let scheduler = scheduler(true);
        let id = scheduler
            .submit(task(ModificationType::BugFix, &["a.rs"]))
            .await
            .unwrap();

        let handles = scheduler.dispatch_pending().await.unwrap();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            assert_eq!(handle.wait().await, Some(TaskStatus::Completed));
        }

        let done = scheduler.task(&id).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.assigned_team, Some(ExecutorTeam::Debugging));
        assert!(done.actual_duration_secs.is_some());

        let status = scheduler.status();
        assert_eq!(status.active_tasks, 0);
        assert_eq!(status.completed_tasks, 1);
        assert_eq!(status.agent_capabilities.len(), 5);
    }

    #[tokio::test]
    async fn test_executor_failure_rolls_back() {
        let scheduler = scheduler(false);
        scheduler
            .submit(task(ModificationType::CodeOptimization, &["a.rs"]))
            .await
            .unwrap();

        for handle in scheduler.dispatch_pending().await.unwrap() {
            assert_eq!(handle.wait().await, Some(TaskStatus::RolledBack));
        }

        let stats = scheduler.outcome_stats().unwrap();
        let opt = &stats[&ModificationType::CodeOptimization];
        assert_eq!(opt.rolled_back, 1);
        assert_eq!(opt.success_rate(), Some(0.0));
    }

    #[tokio::test]
    async fn test_automation_disabled_admits_nothing() {
        let ctx = ControlContext::new();
        ctx.set_automation_enabled(false);
        let scheduler = ModificationScheduler::builder(ModificationConfig::default(), ctx)
            .executor(Arc::new(Always(true)))
            .probe(Arc::new(Calm))
            .build();
        scheduler
            .submit(task(ModificationType::BugFix, &["a.rs"]))
            .await
            .unwrap();

        assert!(scheduler.dispatch_pending().await.unwrap().is_empty());
        assert_eq!(scheduler.status().queued_tasks, 1);
    }

    #[tokio::test]
    async fn test_unknown_task_id() {
        let scheduler = scheduler(true);
        assert!(matches!(
            scheduler.task("nope"),
            Err(EngineError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_degrades_on_poisoned_state() {
        let scheduler = scheduler(true);
        scheduler
            .submit(task(ModificationType::BugFix, &["a.rs"]))
            .await
            .unwrap();
        scheduler.poison_state();

        let status = scheduler.status();
        assert!(status.degraded.as_deref().unwrap().contains("scheduler state"));
        assert_eq!(status.queued_tasks, 0);
        assert_eq!(status.executor, "always");
        assert!(!status.agent_capabilities.is_empty());
        assert!(matches!(
            scheduler.dispatch_pending().await,
            Err(EngineError::StatePoisoned(_))
        ));
    }
}
