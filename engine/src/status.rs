//! Read-only status aggregation for the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::modification::generator::{CONFIGURATION, ERROR_RECOVERY, MCP_DISCOVERY, PERFORMANCE};
use crate::modification::{ModificationScheduler, TaskSummary};
use crate::ports::{StatusProvider, StatusSnapshot};
use crate::recovery::{ErrorCategory, ErrorEvent, RecoveryEngine, Severity};

/// Component score below which an issue is raised
const HEALTH_THRESHOLD: f64 = 0.7;

pub const SELF_MODIFICATION: &str = "self_modification";

/// Short form of an error event for status payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentError {
    pub id: String,
    pub error_type: String,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub component: String,
    pub resolved: bool,
    pub recurrence_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl From<&ErrorEvent> for RecentError {
    fn from(event: &ErrorEvent) -> Self {
        Self {
            id: event.id.clone(),
            error_type: event.error_type.clone(),
            severity: event.severity,
            category: event.category,
            component: event.component.clone(),
            resolved: event.resolved,
            recurrence_count: event.recurrence_count,
            timestamp: event.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecoveryStatus {
    pub emergency_mode_active: bool,
    pub automation_enabled: bool,
    pub total_errors: usize,
    pub resolved_errors: usize,
    pub active_recoveries: usize,
    pub recovery_rules_enabled_count: usize,
    pub recent_errors: Vec<RecentError>,
    /// Set when the snapshot could not be computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl ErrorRecoveryStatus {
    pub fn degraded(emergency_mode_active: bool, reason: impl Into<String>) -> Self {
        Self {
            emergency_mode_active,
            automation_enabled: false,
            total_errors: 0,
            resolved_errors: 0,
            active_recoveries: 0,
            recovery_rules_enabled_count: 0,
            recent_errors: Vec::new(),
            degraded: Some(reason.into()),
        }
    }

    /// Share of recorded errors that are resolved; 1.0 with no errors
    pub fn resolution_rate(&self) -> f64 {
        if self.total_errors == 0 {
            1.0
        } else {
            self.resolved_errors as f64 / self.total_errors as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfModificationStatus {
    pub executor: String,
    pub agents_initialized: usize,
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub completed_tasks: usize,
    pub safety_checks_enabled: bool,
    pub automation_enabled: bool,
    pub recent_tasks: Vec<TaskSummary>,
    /// Agent -> specializations
    pub agent_capabilities: BTreeMap<String, Vec<String>>,
    pub system_learning_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Mean of the component scores, 0.0 to 1.0
    pub overall_score: f64,
    pub component_scores: BTreeMap<String, f64>,
    pub active_issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl SystemHealth {
    pub fn degraded() -> Self {
        Self {
            overall_score: 0.0,
            component_scores: BTreeMap::new(),
            active_issues: vec!["Health assessment failed".to_string()],
            recommendations: vec!["Investigate health monitoring system".to_string()],
            timestamp: Utc::now(),
        }
    }

    fn from_scores(component_scores: BTreeMap<String, f64>) -> Self {
        let overall_score = if component_scores.is_empty() {
            0.0
        } else {
            component_scores.values().sum::<f64>() / component_scores.len() as f64
        };

        let mut active_issues = Vec::new();
        let mut recommendations = Vec::new();
        for (component, score) in &component_scores {
            if *score < HEALTH_THRESHOLD {
                active_issues.push(format!("{} health below threshold: {:.2}", component, score));
                recommendations.push(format!("Review and optimize {} system", component));
            }
        }

        Self {
            overall_score,
            component_scores,
            active_issues,
            recommendations,
            timestamp: Utc::now(),
        }
    }
}

fn error_recovery_score(status: &ErrorRecoveryStatus) -> f64 {
    let emergency = if status.emergency_mode_active { 0.0 } else { 1.0 };
    status.resolution_rate() * 0.8 + emergency * 0.2
}

fn self_modification_score(status: &SelfModificationStatus) -> f64 {
    let agents = if status.agents_initialized > 0 { 1.0 } else { 0.5 };
    let completed = (status.completed_tasks as f64 / 5.0).min(1.0);
    let safety = if status.safety_checks_enabled { 1.0 } else { 0.0 };
    agents * 0.4 + completed * 0.3 + safety * 0.3
}

fn number(snapshot: &StatusSnapshot, key: &str, default: f64) -> f64 {
    snapshot.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Score for a provider-supplied subsystem, if it is one we know how to rate
fn provider_score(subsystem: &str, snapshot: &StatusSnapshot) -> Option<f64> {
    match subsystem {
        MCP_DISCOVERY => {
            let installation = number(snapshot, "installation_success_rate", 0.0);
            let discovered = (number(snapshot, "total_discovered", 0.0) / 20.0).min(1.0);
            Some(installation * 0.7 + discovered * 0.3)
        }
        CONFIGURATION => {
            let auto_tuning = match snapshot.get("auto_tuning_enabled").and_then(Value::as_bool) {
                Some(true) => 1.0,
                _ => 0.0,
            };
            let applied = (number(snapshot, "total_changes_applied", 0.0) / 10.0).min(1.0);
            Some(auto_tuning * 0.6 + applied * 0.4)
        }
        PERFORMANCE => {
            let metrics = snapshot.get("current_metrics").and_then(Value::as_object);
            let metric = |key: &str, default: f64| {
                metrics
                    .and_then(|m| m.get(key))
                    .and_then(Value::as_f64)
                    .unwrap_or(default)
            };
            let response = (1.0 - metric("response_time", 10.0) / 10.0).max(0.0);
            let error_rate = (1.0 - metric("error_rate", 1.0) / 0.1).max(0.0);
            Some(response * 0.5 + error_rate * 0.5)
        }
        _ => None,
    }
}

/// Serialize a status struct into a snapshot map
pub fn to_snapshot<T: Serialize>(status: &T) -> StatusSnapshot {
    match serde_json::to_value(status) {
        Ok(Value::Object(map)) => map,
        _ => StatusSnapshot::new(),
    }
}

/// Aggregates both engines and any external providers
#[derive(Clone)]
pub struct StatusFacade {
    recovery: RecoveryEngine,
    scheduler: ModificationScheduler,
    providers: Vec<Arc<dyn StatusProvider>>,
}

impl StatusFacade {
    pub fn new(recovery: RecoveryEngine, scheduler: ModificationScheduler) -> Self {
        Self {
            recovery,
            scheduler,
            providers: Vec::new(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn StatusProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn error_recovery_status(&self) -> ErrorRecoveryStatus {
        self.recovery.status()
    }

    pub fn self_modification_status(&self) -> SelfModificationStatus {
        self.scheduler.status()
    }

    /// Snapshots from every provider plus the recovery engine, keyed by
    /// subsystem. Providers that fail are left out.
    pub async fn collect_snapshots(&self) -> HashMap<String, StatusSnapshot> {
        let mut snapshots = HashMap::new();
        for provider in &self.providers {
            match provider.snapshot().await {
                Ok(snapshot) => {
                    snapshots.insert(provider.subsystem().to_string(), snapshot);
                }
                Err(e) => {
                    tracing::warn!(
                        subsystem = provider.subsystem(),
                        "Status provider failed: {}",
                        e
                    );
                }
            }
        }

        let recovery = self.recovery.status();
        if recovery.degraded.is_none() {
            snapshots.insert(ERROR_RECOVERY.to_string(), to_snapshot(&recovery));
        }
        snapshots
    }

    /// Weighted component scores; any failure yields [`SystemHealth::degraded`]
    pub async fn system_health(&self) -> SystemHealth {
        match self.assess().await {
            Ok(health) => health,
            Err(e) => {
                tracing::error!("Error assessing system health: {}", e);
                SystemHealth::degraded()
            }
        }
    }

    async fn assess(&self) -> anyhow::Result<SystemHealth> {
        let mut scores = BTreeMap::new();

        for provider in &self.providers {
            let snapshot = provider.snapshot().await?;
            if let Some(score) = provider_score(provider.subsystem(), &snapshot) {
                scores.insert(provider.subsystem().to_string(), score);
            }
        }

        let recovery = self.recovery.status();
        if let Some(reason) = recovery.degraded {
            anyhow::bail!("error recovery status unavailable: {}", reason);
        }
        scores.insert(ERROR_RECOVERY.to_string(), error_recovery_score(&recovery));

        let modification = self.scheduler.status();
        if let Some(reason) = modification.degraded {
            anyhow::bail!("self-modification status unavailable: {}", reason);
        }
        scores.insert(SELF_MODIFICATION.to_string(), self_modification_score(&modification));

        Ok(SystemHealth::from_scores(scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recovery_status(total: usize, resolved: usize, emergency: bool) -> ErrorRecoveryStatus {
        ErrorRecoveryStatus {
            emergency_mode_active: emergency,
            automation_enabled: true,
            total_errors: total,
            resolved_errors: resolved,
            active_recoveries: 0,
            recovery_rules_enabled_count: 6,
            recent_errors: Vec::new(),
            degraded: None,
        }
    }

    #[test]
    fn test_error_recovery_score() {
        assert!((error_recovery_score(&recovery_status(0, 0, false)) - 1.0).abs() < 1e-9);
        assert!((error_recovery_score(&recovery_status(4, 2, false)) - 0.6).abs() < 1e-9);
        assert!((error_recovery_score(&recovery_status(4, 4, true)) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_issues_raised_below_threshold() {
        let scores = BTreeMap::from([
            ("error_recovery".to_string(), 0.6),
            ("self_modification".to_string(), 1.0),
        ]);
        let health = SystemHealth::from_scores(scores);
        assert!((health.overall_score - 0.8).abs() < 1e-9);
        assert_eq!(health.active_issues, vec!["error_recovery health below threshold: 0.60"]);
        assert_eq!(health.recommendations.len(), 1);
    }

    #[test]
    fn test_degraded_health_shape() {
        let health = SystemHealth::degraded();
        assert_eq!(health.overall_score, 0.0);
        assert!(health.component_scores.is_empty());
        assert_eq!(health.active_issues, vec!["Health assessment failed"]);
    }

    #[test]
    fn test_provider_scores() {
        let snapshot =
            to_snapshot(&json!({"installation_success_rate": 1.0, "total_discovered": 10}));
        let score = provider_score(MCP_DISCOVERY, &snapshot).unwrap();
        assert!((score - 0.85).abs() < 1e-9);

        let perf =
            to_snapshot(&json!({"current_metrics": {"response_time": 5.0, "error_rate": 0.05}}));
        let score = provider_score(PERFORMANCE, &perf).unwrap();
        assert!((score - 0.5).abs() < 1e-9);

        assert!(provider_score("unknown", &snapshot).is_none());
    }

    #[test]
    fn test_degraded_payload_serializes_reason() {
        let status = ErrorRecoveryStatus::degraded(true, "engine state lock poisoned");
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["degraded"], "engine state lock poisoned");
        assert_eq!(value["total_errors"], 0);
        assert_eq!(value["emergency_mode_active"], true);
    }

    #[tokio::test]
    async fn test_health_degrades_when_scheduler_state_poisoned() {
        let ctx = crate::context::ControlContext::new();
        let recovery = RecoveryEngine::new(
            crate::config::RecoveryConfig::default(),
            ctx.clone(),
            crate::recovery::ActionTable::with_defaults(),
            Arc::new(crate::ports::NullSink),
        )
        .unwrap();
        let config = crate::config::ModificationConfig::default();
        let scheduler = ModificationScheduler::builder(config, ctx).build();
        let facade = StatusFacade::new(recovery, scheduler.clone());
        scheduler.poison_state();

        let health = facade.system_health().await;
        assert_eq!(health.overall_score, 0.0);
        assert_eq!(health.active_issues, vec!["Health assessment failed".to_string()]);
        assert!(facade.self_modification_status().degraded.is_some());
        assert!(facade.collect_snapshots().await.contains_key(ERROR_RECOVERY));
    }
}
