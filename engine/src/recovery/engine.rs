//! Recovery engine
//!
//! Owns the error event table and the rule registry. `report` classifies
//! and merges a signal, then (unless emergency mode is on, automation is
//! off, or the concurrency cap is reached) admits at most one matching rule
//! and runs its action sequence as a detached tokio task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::actions::ActionTable;
use super::classifier::{classify_category, classify_severity};
use super::rules::{RuleRegistry, RuleSnapshot};
use super::types::{ErrorCategory, ErrorEvent, ErrorSignature, RecoveryAction, Severity};
use crate::config::RecoveryConfig;
use crate::context::ControlContext;
use crate::error::{poisoned, EngineError, EngineResult};
use crate::ports::{record_quietly, AuditRecord, AuditSink, ErrorReport, RetentionTier};
use crate::status::{ErrorRecoveryStatus, RecentError};

/// Result of running one rule against one event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub event_id: String,
    pub rule: String,
    pub success: bool,
    /// Actions that completed successfully, in order
    pub actions_taken: Vec<RecoveryAction>,
    pub timed_out: bool,
    pub finished_at: DateTime<Utc>,
}

/// Handle on a detached rule execution
#[derive(Debug)]
pub struct RecoveryHandle {
    pub rule: String,
    handle: JoinHandle<RecoveryOutcome>,
}

impl RecoveryHandle {
    /// Wait for the rule to finish; `None` if the task was aborted
    pub async fn wait(self) -> Option<RecoveryOutcome> {
        self.handle.await.ok()
    }
}

/// What `report` did with a signal
#[derive(Debug)]
pub struct Reported {
    pub event_id: String,
    pub signature: ErrorSignature,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub recurrence_count: u32,
    /// Set when a recovery rule was started for the event
    pub recovery: Option<RecoveryHandle>,
}

struct RecoveryState {
    events: HashMap<ErrorSignature, ErrorEvent>,
    rules: RuleRegistry,
    /// signature -> rule currently running for that event
    active: HashMap<ErrorSignature, String>,
}

struct Inner {
    config: RecoveryConfig,
    ctx: ControlContext,
    actions: ActionTable,
    sink: Arc<dyn AuditSink>,
    permits: Arc<Semaphore>,
    state: Mutex<RecoveryState>,
}

/// Error classification and recovery rule engine
#[derive(Clone)]
pub struct RecoveryEngine {
    inner: Arc<Inner>,
}

impl RecoveryEngine {
    /// Build an engine with the configured (or seed) rule set
    pub fn new(
        config: RecoveryConfig,
        ctx: ControlContext,
        actions: ActionTable,
        sink: Arc<dyn AuditSink>,
    ) -> EngineResult<Self> {
        let rules = match &config.rules {
            Some(specs) => RuleRegistry::from_specs(specs.clone())?,
            None => RuleRegistry::seeded()?,
        };
        Ok(Self::with_registry(config, ctx, actions, sink, rules))
    }

    pub fn with_registry(
        config: RecoveryConfig,
        ctx: ControlContext,
        actions: ActionTable,
        sink: Arc<dyn AuditSink>,
        rules: RuleRegistry,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_recoveries));
        Self {
            inner: Arc::new(Inner {
                config,
                ctx,
                actions,
                sink,
                permits,
                state: Mutex::new(RecoveryState {
                    events: HashMap::new(),
                    rules,
                    active: HashMap::new(),
                }),
            }),
        }
    }

    fn lock(&self) -> EngineResult<MutexGuard<'_, RecoveryState>> {
        self.inner.state.lock().map_err(poisoned("recovery state"))
    }

    /// Panic while holding the state lock so later locks fail
    #[cfg(test)]
    pub(crate) fn poison_state(&self) {
        let inner = self.inner.clone();
        let _ = std::thread::spawn(move || {
            let _state = inner.state.lock();
            panic!("recovery state poisoned for test");
        })
        .join();
    }

    pub fn context(&self) -> &ControlContext {
        &self.inner.ctx
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    /// Record an error signal and, when allowed, start a recovery for it
    pub async fn report(&self, report: ErrorReport) -> EngineResult<Reported> {
        let now = Utc::now();
        let severity = classify_severity(&report.error_type, &report.message, &report.component);
        let category = classify_category(&report.error_type, &report.message, &report.component);
        let signature = ErrorSignature::of(&report.component, &report.error_type, &report.message);

        let event = {
            let mut state = self.lock()?;
            match state.events.entry(signature.clone()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().record_recurrence(
                        severity,
                        self.inner.config.escalation_threshold,
                        now,
                    );
                    entry.get().clone()
                }
                Entry::Vacant(entry) => entry
                    .insert(ErrorEvent::new(report, severity, category, now))
                    .clone(),
            }
        };

        tracing::debug!(
            event_id = %event.id,
            severity = event.severity.as_str(),
            category = event.category.as_str(),
            recurrence = event.recurrence_count,
            "Error event recorded"
        );

        record_quietly(
            &*self.inner.sink,
            AuditRecord::new(
                "error_event",
                RetentionTier::Analytics,
                json!({
                    "error_id": event.id,
                    "signature": signature.to_string(),
                    "error_type": event.error_type,
                    "severity": event.severity.as_str(),
                    "category": event.category.as_str(),
                    "component": event.component,
                    "message": event.message,
                    "metadata": event.metadata,
                    "recurrence_count": event.recurrence_count,
                }),
            ),
        )
        .await;

        let recovery = if self.inner.ctx.is_emergency_mode_active() {
            tracing::debug!(event_id = %event.id, "Emergency mode active, not starting recovery");
            None
        } else if !self.inner.ctx.automation_enabled() {
            tracing::debug!(event_id = %event.id, "Automation disabled, not starting recovery");
            None
        } else if self.active_recoveries()? >= self.inner.config.max_concurrent_recoveries {
            tracing::debug!(event_id = %event.id, "Recovery capacity exhausted");
            None
        } else {
            self.attempt_recovery(&signature)?
        };

        Ok(Reported {
            event_id: event.id,
            signature,
            severity: event.severity,
            category: event.category,
            recurrence_count: event.recurrence_count,
            recovery,
        })
    }

    /// Matching rules for an event, in the order they would be tried
    pub fn find_matching_rules(&self, event: &ErrorEvent) -> EngineResult<Vec<RuleSnapshot>> {
        let state = self.lock()?;
        Ok(state
            .rules
            .find_matching(event)
            .into_iter()
            .map(|rule| rule.snapshot())
            .collect())
    }

    /// Admit the first eligible rule among the top candidates and start it.
    ///
    /// Returns `None` when the event is unknown, resolved, already being
    /// recovered, has no admissible rule, or no execution slot is free.
    pub fn attempt_recovery(
        &self,
        signature: &ErrorSignature,
    ) -> EngineResult<Option<RecoveryHandle>> {
        let now = Utc::now();
        let Ok(permit) = self.inner.permits.clone().try_acquire_owned() else {
            return Ok(None);
        };

        let rule_name = {
            let mut guard = self.lock()?;
            let state = &mut *guard;

            let Some(event) = state.events.get(signature) else {
                return Ok(None);
            };
            if event.resolved || state.active.contains_key(signature) {
                return Ok(None);
            }

            let candidates = state.rules.find_matching(event);
            if candidates.is_empty() {
                tracing::warn!(
                    event_id = %event.id,
                    error_type = %event.error_type,
                    "No recovery rules found for error"
                );
                return Ok(None);
            }

            let chosen = candidates
                .into_iter()
                .take(self.inner.config.max_rule_candidates)
                .find(|rule| rule.admits(now, self.inner.config.min_attempts_for_rate))
                .map(|rule| rule.name().to_string());

            let Some(rule_name) = chosen else {
                tracing::debug!(
                    event_id = %event.id,
                    "Matching rules are cooling down or below their success-rate floor"
                );
                return Ok(None);
            };

            if let Some(rule) = state.rules.get_mut(&rule_name) {
                rule.last_used = Some(now);
            }
            state.active.insert(signature.clone(), rule_name.clone());
            rule_name
        };

        let engine = self.clone();
        let signature = signature.clone();
        let spawned_rule = rule_name.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            engine.run_admitted(signature, spawned_rule).await
        });

        Ok(Some(RecoveryHandle {
            rule: rule_name,
            handle,
        }))
    }

    /// Run a specific rule against an event right away, bypassing admission
    pub async fn execute_rule(
        &self,
        signature: &ErrorSignature,
        rule_name: &str,
    ) -> EngineResult<RecoveryOutcome> {
        {
            let mut guard = self.lock()?;
            let state = &mut *guard;
            if !state.events.contains_key(signature) {
                return Err(EngineError::EventNotFound(signature.to_string()));
            }
            let rule = state
                .rules
                .get_mut(rule_name)
                .ok_or_else(|| EngineError::RuleNotFound(rule_name.to_string()))?;
            rule.last_used = Some(Utc::now());
            state.active.insert(signature.clone(), rule_name.to_string());
        }

        Ok(self
            .run_admitted(signature.clone(), rule_name.to_string())
            .await)
    }

    async fn run_admitted(&self, signature: ErrorSignature, rule_name: String) -> RecoveryOutcome {
        let snapshot = self.lock().ok().and_then(|state| {
            let event = state.events.get(&signature)?.clone();
            let actions = state.rules.get(&rule_name)?.actions().to_vec();
            Some((event, actions))
        });

        let Some((event, actions)) = snapshot else {
            tracing::warn!(rule = %rule_name, "Event or rule vanished before recovery started");
            let _ = self.finish(&signature, &rule_name, false, &[]);
            return RecoveryOutcome {
                event_id: String::new(),
                rule: rule_name,
                success: false,
                actions_taken: Vec::new(),
                timed_out: false,
                finished_at: Utc::now(),
            };
        };

        tracing::info!(rule = %rule_name, event_id = %event.id, "Executing recovery rule");

        let was_emergency = self.inner.ctx.is_emergency_mode_active();
        let mut taken = Vec::with_capacity(actions.len());
        let (success, timed_out) = match tokio::time::timeout(
            self.inner.config.rule_timeout(),
            self.run_actions(&event, &actions, &mut taken),
        )
        .await
        {
            Ok(success) => (success, false),
            Err(_) => {
                tracing::warn!(rule = %rule_name, event_id = %event.id, "Recovery rule timed out");
                (false, true)
            }
        };

        if let Err(e) = self.finish(&signature, &rule_name, success, &taken) {
            tracing::error!(rule = %rule_name, "Failed to record recovery outcome: {}", e);
        }

        if success {
            tracing::info!(
                event_id = %event.id,
                rule = %rule_name,
                "Successfully recovered from error"
            );
        } else {
            tracing::warn!(event_id = %event.id, rule = %rule_name, "Recovery failed");
        }

        let finished_at = Utc::now();
        record_quietly(
            &*self.inner.sink,
            AuditRecord::new(
                "recovery_attempt",
                RetentionTier::Analytics,
                json!({
                    "error_id": event.id,
                    "rule_name": rule_name,
                    "actions": actions.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
                    "actions_taken": taken.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
                    "success": success,
                    "timed_out": timed_out,
                    "timestamp": finished_at.to_rfc3339(),
                }),
            ),
        )
        .await;

        if !was_emergency && self.inner.ctx.is_emergency_mode_active() {
            record_quietly(
                &*self.inner.sink,
                AuditRecord::new(
                    "emergency_mode",
                    RetentionTier::Analytics,
                    json!({
                        "error_id": event.id,
                        "rule_name": rule_name,
                        "message": event.message,
                        "activated_at": finished_at.to_rfc3339(),
                    }),
                ),
            )
            .await;
        }

        RecoveryOutcome {
            event_id: event.id,
            rule: rule_name,
            success,
            actions_taken: taken,
            timed_out,
            finished_at,
        }
    }

    /// Run actions in order, stopping at the first failure
    async fn run_actions(
        &self,
        event: &ErrorEvent,
        actions: &[RecoveryAction],
        taken: &mut Vec<RecoveryAction>,
    ) -> bool {
        for action in actions {
            if !self.inner.actions.run(*action, event, &self.inner.ctx).await {
                return false;
            }
            taken.push(*action);
        }
        true
    }

    fn finish(
        &self,
        signature: &ErrorSignature,
        rule_name: &str,
        success: bool,
        taken: &[RecoveryAction],
    ) -> EngineResult<()> {
        let mut state = self.lock()?;
        let now = Utc::now();

        if let Some(event) = state.events.get_mut(signature) {
            event.recovery_actions_taken.extend_from_slice(taken);
            if success {
                event.mark_resolved(now);
            }
        }
        if let Some(rule) = state.rules.get_mut(rule_name) {
            rule.record_outcome(success);
        }
        state.active.remove(signature);
        Ok(())
    }

    /// Drop events whose last detection is older than the retention window
    pub fn purge_expired(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let retention = self.inner.config.retention();
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let before = state.events.len();
        let active = &state.active;
        state.events.retain(|signature, event| {
            now - event.timestamp < retention || active.contains_key(signature)
        });
        let purged = before - state.events.len();
        if purged > 0 {
            tracing::info!(purged, "Purged expired error events");
        }
        Ok(purged)
    }

    pub fn active_recoveries(&self) -> EngineResult<usize> {
        Ok(self.lock()?.active.len())
    }

    /// All events, most recently detected first
    pub fn events(&self) -> EngineResult<Vec<ErrorEvent>> {
        let state = self.lock()?;
        let mut events: Vec<ErrorEvent> = state.events.values().cloned().collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(events)
    }

    pub fn event(&self, signature: &ErrorSignature) -> EngineResult<Option<ErrorEvent>> {
        Ok(self.lock()?.events.get(signature).cloned())
    }

    pub fn rules(&self) -> EngineResult<Vec<RuleSnapshot>> {
        Ok(self.lock()?.rules.snapshots())
    }

    /// Status snapshot for the orchestrator; degraded instead of failing
    pub fn status(&self) -> ErrorRecoveryStatus {
        let emergency = self.inner.ctx.is_emergency_mode_active();
        let state = match self.lock() {
            Ok(state) => state,
            Err(e) => return ErrorRecoveryStatus::degraded(emergency, e.to_string()),
        };

        let mut recent: Vec<&ErrorEvent> = state.events.values().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        ErrorRecoveryStatus {
            emergency_mode_active: emergency,
            automation_enabled: self.inner.ctx.automation_enabled(),
            total_errors: state.events.len(),
            resolved_errors: state.events.values().filter(|e| e.resolved).count(),
            active_recoveries: state.active.len(),
            recovery_rules_enabled_count: state.rules.enabled_count(),
            recent_errors: recent.into_iter().take(10).map(RecentError::from).collect(),
            degraded: None,
        }
    }
}
