//! Background loops driving both engines
//!
//! Five independent tokio tasks: error detection, recovery cleanup, task
//! generation, task execution and learning. Each runs one iteration, then
//! sleeps for its interval (or its backoff after a failed iteration). A
//! failed iteration never ends the loop; only the shutdown signal does.

use chrono::Utc;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{EngineConfig, LoopConfig};
use crate::modification::{ModificationScheduler, TaskGenerator};
use crate::ports::{record_quietly, AuditRecord, AuditSink, RetentionTier, SignalSource};
use crate::recovery::RecoveryEngine;
use crate::status::StatusFacade;

/// One iteration of each loop, callable on its own
#[derive(Clone)]
pub struct ControlLoops {
    recovery: RecoveryEngine,
    scheduler: ModificationScheduler,
    generator: TaskGenerator,
    facade: StatusFacade,
    source: Option<Arc<dyn SignalSource>>,
    sink: Arc<dyn AuditSink>,
}

impl ControlLoops {
    pub fn new(
        config: &EngineConfig,
        recovery: RecoveryEngine,
        scheduler: ModificationScheduler,
        facade: StatusFacade,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            recovery,
            scheduler,
            generator: TaskGenerator::new(config.generator.clone()),
            facade,
            source: None,
            sink,
        }
    }

    pub fn with_signal_source(mut self, source: Arc<dyn SignalSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Poll the signal source and report everything it returned
    pub async fn detect_once(&self) -> anyhow::Result<usize> {
        let Some(source) = &self.source else {
            return Ok(0);
        };

        let reports = source.poll().await?;
        let count = reports.len();
        for report in reports {
            if let Err(e) = self.recovery.report(report).await {
                tracing::error!("Failed to process error signal: {}", e);
            }
        }
        if count > 0 {
            tracing::debug!(count, "Processed error signals");
        }
        Ok(count)
    }

    pub async fn cleanup_once(&self) -> anyhow::Result<usize> {
        Ok(self.recovery.purge_expired(Utc::now())?)
    }

    /// Generate candidate tasks from current status and queue the admissible ones
    pub async fn generate_once(&self) -> anyhow::Result<Vec<String>> {
        let snapshots = self.facade.collect_snapshots().await;
        let candidates = self.generator.generate(&snapshots, Utc::now());
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!("Generated {} new modification tasks", candidates.len());
        Ok(self.scheduler.submit_all(candidates).await?)
    }

    pub async fn execute_once(&self) -> anyhow::Result<usize> {
        let started = self.scheduler.dispatch_pending().await?;
        Ok(started.len())
    }

    /// Summarize task outcomes per type and persist the summary
    pub async fn learn_once(&self) -> anyhow::Result<()> {
        let stats = self.scheduler.outcome_stats()?;
        if stats.is_empty() {
            return Ok(());
        }

        for (task_type, outcome) in &stats {
            tracing::info!(
                task_type = task_type.as_str(),
                completed = outcome.completed,
                failed = outcome.failed,
                rolled_back = outcome.rolled_back,
                success_rate = outcome.success_rate().unwrap_or(0.0),
                "Modification outcomes"
            );
        }

        record_quietly(
            &*self.sink,
            AuditRecord::new(
                "modification_learning",
                RetentionTier::LongTerm,
                json!({ "outcomes": stats }),
            ),
        )
        .await;
        Ok(())
    }
}

async fn run_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut iteration: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    tracing::info!(loop_name = name, "Loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let wait = match iteration().await {
            Ok(()) => interval,
            Err(e) => {
                tracing::error!(loop_name = name, "Error in loop iteration: {:#}", e);
                backoff
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!(loop_name = name, "Loop stopped");
}

/// Owns the loop tasks and their shutdown signal
pub struct Supervisor {
    loops: ControlLoops,
    config: LoopConfig,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(loops: ControlLoops, config: LoopConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            loops,
            config,
            shutdown,
            handles: Vec::new(),
        }
    }

    fn spawn<F, Fut>(&mut self, name: &'static str, interval: u64, backoff: u64, iteration: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let rx = self.shutdown.subscribe();
        self.handles.push(tokio::spawn(run_loop(
            name,
            Duration::from_secs(interval),
            Duration::from_secs(backoff),
            rx,
            iteration,
        )));
    }

    /// Start all five loops
    pub fn start(&mut self) {
        let cfg = self.config.clone();

        let loops = self.loops.clone();
        self.spawn(
            "error_detection",
            cfg.detection_interval_secs,
            cfg.detection_backoff_secs,
            move || {
                let loops = loops.clone();
                async move { loops.detect_once().await.map(|_| ()) }
            },
        );

        let loops = self.loops.clone();
        self.spawn(
            "recovery_cleanup",
            cfg.cleanup_interval_secs,
            cfg.cleanup_interval_secs,
            move || {
                let loops = loops.clone();
                async move { loops.cleanup_once().await.map(|_| ()) }
            },
        );

        let loops = self.loops.clone();
        self.spawn(
            "task_generation",
            cfg.generation_interval_secs,
            cfg.generation_backoff_secs,
            move || {
                let loops = loops.clone();
                async move { loops.generate_once().await.map(|_| ()) }
            },
        );

        let loops = self.loops.clone();
        self.spawn(
            "task_execution",
            cfg.execution_interval_secs,
            cfg.execution_interval_secs,
            move || {
                let loops = loops.clone();
                async move { loops.execute_once().await.map(|_| ()) }
            },
        );

        let loops = self.loops.clone();
        self.spawn("learning", cfg.learning_interval_secs, cfg.learning_interval_secs, move || {
            let loops = loops.clone();
            async move { loops.learn_once().await }
        });

        tracing::info!(loops = self.handles.len(), "Self-healing supervisor started");
    }

    pub fn is_running(&self) -> bool {
        self.handles.iter().any(|handle| !handle.is_finished())
    }

    /// Signal every loop to stop and wait for them
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!("Loop task ended abnormally: {}", e);
            }
        }
        tracing::info!("Self-healing supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ControlContext;
    use crate::ports::{ErrorReport, NullSink};
    use crate::recovery::ActionTable;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Batch(Mutex<Vec<ErrorReport>>);

    #[async_trait]
    impl SignalSource for Batch {
        async fn poll(&self) -> anyhow::Result<Vec<ErrorReport>> {
            Ok(std::mem::take(&mut *self.0.lock().unwrap()))
        }
    }

    fn loops() -> ControlLoops {
        let config = EngineConfig::default();
        let ctx = ControlContext::new();
        let recovery = RecoveryEngine::new(
            config.recovery.clone(),
            ctx.clone(),
            ActionTable::with_defaults(),
            Arc::new(NullSink),
        )
        .unwrap();
        let scheduler = ModificationScheduler::builder(config.modification.clone(), ctx).build();
        let facade = StatusFacade::new(recovery.clone(), scheduler.clone());
        ControlLoops::new(&config, recovery, scheduler, facade, Arc::new(NullSink))
    }

    fn batch() -> Arc<Batch> {
        Arc::new(Batch(Mutex::new(vec![
            ErrorReport::new("ui", "render", "widget misaligned"),
            ErrorReport::new("api", "timeout", "upstream slow"),
        ])))
    }

    #[tokio::test]
    async fn test_detect_without_source_is_idle() {
        assert_eq!(loops().detect_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_detect_reports_whole_batch() {
        let loops = loops().with_signal_source(batch());

        assert_eq!(loops.detect_once().await.unwrap(), 2);
        assert_eq!(loops.recovery.status().total_errors, 2);
        assert_eq!(loops.detect_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_report_does_not_abort_batch() {
        let source = batch();
        let loops = loops().with_signal_source(source.clone());
        loops.recovery.poison_state();

        assert_eq!(loops.detect_once().await.unwrap(), 2);
        assert!(source.0.lock().unwrap().is_empty());
        assert!(loops.recovery.status().degraded.is_some());
    }
}
