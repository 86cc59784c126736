//! Threshold rules turning subsystem status into modification tasks

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;

use super::types::{ModificationScope, ModificationTask, ModificationType};
use crate::config::GeneratorConfig;
use crate::ports::StatusSnapshot;

pub const PERFORMANCE: &str = "performance";
pub const ERROR_RECOVERY: &str = "error_recovery";
pub const CONFIGURATION: &str = "configuration";
pub const MCP_DISCOVERY: &str = "mcp_discovery";

fn number(snapshot: &StatusSnapshot, key: &str) -> Option<f64> {
    snapshot.get(key).and_then(Value::as_f64)
}

/// Produces candidate tasks from status snapshots keyed by subsystem
#[derive(Debug, Clone, Default)]
pub struct TaskGenerator {
    config: GeneratorConfig,
}

impl TaskGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// One candidate per breached threshold; missing subsystems never trigger
    pub fn generate(
        &self,
        snapshots: &HashMap<String, StatusSnapshot>,
        now: DateTime<Utc>,
    ) -> Vec<ModificationTask> {
        let mut tasks = Vec::new();

        if let Some(status) = snapshots.get(PERFORMANCE) {
            let health = status.get("system_health").and_then(Value::as_str);
            if health == Some(self.config.poor_health_label.as_str()) {
                tasks.push(self.performance_task(status, now));
            }
        }

        if let Some(status) = snapshots.get(ERROR_RECOVERY) {
            let total = number(status, "total_errors").unwrap_or(0.0);
            let resolved = number(status, "resolved_errors").unwrap_or(0.0);
            if total - resolved > self.config.unresolved_error_threshold as f64 {
                tasks.push(self.error_resolution_task(status, total - resolved, now));
            }
        }

        if let Some(status) = snapshots.get(CONFIGURATION) {
            let pending = number(status, "pending_changes").unwrap_or(0.0);
            if pending > self.config.pending_config_threshold as f64 {
                tasks.push(self.configuration_task(status, now));
            }
        }

        if let Some(status) = snapshots.get(MCP_DISCOVERY) {
            let rate = number(status, "installation_success_rate").unwrap_or(1.0);
            if rate < self.config.min_install_success_rate {
                tasks.push(self.integration_task(status, now));
            }
        }

        tasks
    }

    fn performance_task(&self, status: &StatusSnapshot, now: DateTime<Utc>) -> ModificationTask {
        let health = status
            .get("system_health")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        ModificationTask::new(
            ModificationType::PerformanceEnhancement,
            ModificationScope::Subsystem,
            format!("Optimize system performance - current health: {}", health),
            now,
        )
        .with_priority(2)
        .with_complexity(6)
        .with_targets(self.config.performance_targets.iter().cloned())
        .with_criteria([
            "Response time improved by 20%",
            "Error rate reduced below 5%",
            "Memory usage optimized",
        ])
        .with_rollback_plan("Revert to previous configuration and code state")
        .with_metadata("trigger", "performance_degradation".into())
        .with_metadata("current_metrics", Value::Object(status.clone()))
    }

    fn error_resolution_task(
        &self,
        status: &StatusSnapshot,
        unresolved: f64,
        now: DateTime<Utc>,
    ) -> ModificationTask {
        ModificationTask::new(
            ModificationType::BugFix,
            ModificationScope::Module,
            format!("Resolve recurring errors - {} unresolved", unresolved as u64),
            now,
        )
        .with_priority(1)
        .with_complexity(5)
        .with_targets(self.config.error_resolution_targets.iter().cloned())
        .with_criteria([
            "Error resolution rate improved",
            "Recurring errors eliminated",
            "New error patterns handled",
        ])
        .with_rollback_plan("Restore previous error handling logic")
        .with_metadata("trigger", "error_accumulation".into())
        .with_metadata("error_data", Value::Object(status.clone()))
    }

    fn configuration_task(&self, status: &StatusSnapshot, now: DateTime<Utc>) -> ModificationTask {
        ModificationTask::new(
            ModificationType::ConfigurationTuning,
            ModificationScope::SystemWide,
            "Optimize system configuration based on usage patterns",
            now,
        )
        .with_priority(3)
        .with_complexity(4)
        .with_targets(self.config.configuration_targets.iter().cloned())
        .with_criteria([
            "Configuration changes applied automatically",
            "Performance improved",
            "Cost efficiency increased",
        ])
        .with_rollback_plan("Revert to baseline configuration")
        .with_metadata("trigger", "config_inefficiency".into())
        .with_metadata("config_data", Value::Object(status.clone()))
    }

    fn integration_task(&self, status: &StatusSnapshot, now: DateTime<Utc>) -> ModificationTask {
        ModificationTask::new(
            ModificationType::IntegrationAddition,
            ModificationScope::Subsystem,
            "Improve MCP server integration and discovery",
            now,
        )
        .with_priority(4)
        .with_complexity(7)
        .with_targets(self.config.integration_targets.iter().cloned())
        .with_criteria([
            "Installation success rate > 90%",
            "Better server categorization",
            "Improved error handling",
        ])
        .with_rollback_plan("Revert to previous MCP integration")
        .with_metadata("trigger", "mcp_inefficiency".into())
        .with_metadata("discovery_data", Value::Object(status.clone()))
    }
}
