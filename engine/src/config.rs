//! Engine configuration
//!
//! Every field has a serde default so a partial TOML file (or none at all)
//! yields a usable configuration. Durations are expressed in seconds.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::recovery::RuleSpec;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub modification: ModificationConfig,
    #[serde(default)]
    pub loops: LoopConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

/// Error recovery engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Upper bound on rule executions running at once
    #[serde(default = "default_max_concurrent_recoveries")]
    pub max_concurrent_recoveries: usize,
    /// How many top-ranked matching rules are considered per attempt
    #[serde(default = "default_max_rule_candidates")]
    pub max_rule_candidates: usize,
    /// Attempts needed before a rule's success rate is trusted
    #[serde(default = "default_min_attempts_for_rate")]
    pub min_attempts_for_rate: u32,
    /// Recurrences after which severity is escalated
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
    /// Days an event is kept after its last detection
    #[serde(default = "default_error_retention_days")]
    pub error_retention_days: i64,
    /// Deadline for one rule's whole action sequence
    #[serde(default = "default_rule_timeout_secs")]
    pub rule_timeout_secs: u64,
    /// Replaces the seed rule set when present
    #[serde(default)]
    pub rules: Option<Vec<RuleSpec>>,
}

/// Self-modification scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationConfig {
    #[serde(default = "default_max_concurrent_modifications")]
    pub max_concurrent_modifications: usize,
    #[serde(default = "default_true")]
    pub safety_checks_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_rollback_on_failure: bool,
    /// Deadline for a single executor call
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Global CPU usage (percent) above which admission is blocked
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f32,
    /// Memory usage (percent) above which admission is blocked
    #[serde(default = "default_max_memory_percent")]
    pub max_memory_percent: f64,
    /// Turns a collaborative team gets before the task counts as failed
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

/// Polling intervals and error backoffs for the supervisor loops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_detection_interval_secs")]
    pub detection_interval_secs: u64,
    #[serde(default = "default_detection_backoff_secs")]
    pub detection_backoff_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_generation_interval_secs")]
    pub generation_interval_secs: u64,
    #[serde(default = "default_generation_backoff_secs")]
    pub generation_backoff_secs: u64,
    #[serde(default = "default_execution_interval_secs")]
    pub execution_interval_secs: u64,
    #[serde(default = "default_learning_interval_secs")]
    pub learning_interval_secs: u64,
}

/// Thresholds and target files for task generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Health label of the performance subsystem that triggers tuning
    #[serde(default = "default_poor_health_label")]
    pub poor_health_label: String,
    #[serde(default = "default_unresolved_error_threshold")]
    pub unresolved_error_threshold: u64,
    #[serde(default = "default_pending_config_threshold")]
    pub pending_config_threshold: u64,
    #[serde(default = "default_min_install_success_rate")]
    pub min_install_success_rate: f64,
    #[serde(default = "default_performance_targets")]
    pub performance_targets: Vec<String>,
    #[serde(default = "default_error_resolution_targets")]
    pub error_resolution_targets: Vec<String>,
    #[serde(default = "default_configuration_targets")]
    pub configuration_targets: Vec<String>,
    #[serde(default = "default_integration_targets")]
    pub integration_targets: Vec<String>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_max_concurrent_recoveries() -> usize {
    3
}

fn default_max_rule_candidates() -> usize {
    3
}

fn default_min_attempts_for_rate() -> u32 {
    10
}

fn default_escalation_threshold() -> u32 {
    5
}

fn default_error_retention_days() -> i64 {
    30
}

fn default_rule_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent_modifications() -> usize {
    2
}

fn default_execution_timeout_secs() -> u64 {
    3600
}

fn default_max_cpu_percent() -> f32 {
    90.0
}

fn default_max_memory_percent() -> f64 {
    95.0
}

fn default_max_turns() -> usize {
    10
}

fn default_detection_interval_secs() -> u64 {
    30
}

fn default_detection_backoff_secs() -> u64 {
    60
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

fn default_generation_interval_secs() -> u64 {
    3600
}

fn default_generation_backoff_secs() -> u64 {
    300
}

fn default_execution_interval_secs() -> u64 {
    60
}

fn default_learning_interval_secs() -> u64 {
    1800
}

fn default_poor_health_label() -> String {
    "poor".to_string()
}

fn default_unresolved_error_threshold() -> u64 {
    5
}

fn default_pending_config_threshold() -> u64 {
    10
}

fn default_min_install_success_rate() -> f64 {
    0.8
}

fn default_performance_targets() -> Vec<String> {
    vec![
        "engine/src/recovery/engine.rs".to_string(),
        "engine/src/modification/scheduler.rs".to_string(),
    ]
}

fn default_error_resolution_targets() -> Vec<String> {
    vec!["engine/src/recovery/rules.rs".to_string()]
}

fn default_configuration_targets() -> Vec<String> {
    vec![
        "engine/src/config.rs".to_string(),
        "mcps/self-healing-mcp/src/config.rs".to_string(),
    ]
}

fn default_integration_targets() -> Vec<String> {
    vec![
        "mcps/self-healing-mcp/src/server.rs".to_string(),
        "mcps/self-healing-mcp/src/providers.rs".to_string(),
    ]
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_recoveries: default_max_concurrent_recoveries(),
            max_rule_candidates: default_max_rule_candidates(),
            min_attempts_for_rate: default_min_attempts_for_rate(),
            escalation_threshold: default_escalation_threshold(),
            error_retention_days: default_error_retention_days(),
            rule_timeout_secs: default_rule_timeout_secs(),
            rules: None,
        }
    }
}

impl Default for ModificationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_modifications: default_max_concurrent_modifications(),
            safety_checks_enabled: true,
            auto_rollback_on_failure: true,
            execution_timeout_secs: default_execution_timeout_secs(),
            max_cpu_percent: default_max_cpu_percent(),
            max_memory_percent: default_max_memory_percent(),
            max_turns: default_max_turns(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            detection_interval_secs: default_detection_interval_secs(),
            detection_backoff_secs: default_detection_backoff_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            generation_interval_secs: default_generation_interval_secs(),
            generation_backoff_secs: default_generation_backoff_secs(),
            execution_interval_secs: default_execution_interval_secs(),
            learning_interval_secs: default_learning_interval_secs(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            poor_health_label: default_poor_health_label(),
            unresolved_error_threshold: default_unresolved_error_threshold(),
            pending_config_threshold: default_pending_config_threshold(),
            min_install_success_rate: default_min_install_success_rate(),
            performance_targets: default_performance_targets(),
            error_resolution_targets: default_error_resolution_targets(),
            configuration_targets: default_configuration_targets(),
            integration_targets: default_integration_targets(),
        }
    }
}

impl RecoveryConfig {
    pub fn rule_timeout(&self) -> Duration {
        Duration::from_secs(self.rule_timeout_secs)
    }

    /// Saturates instead of overflowing; `EngineConfig::validate` rejects
    /// out-of-range values up front
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.error_retention_days).unwrap_or(chrono::Duration::MAX)
    }
}

impl ModificationConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(content: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot be turned into durations
    pub fn validate(&self) -> EngineResult<()> {
        let days = self.recovery.error_retention_days;
        if days < 0 || chrono::Duration::try_days(days).is_none() {
            return Err(EngineError::InvalidConfig(format!(
                "recovery.error_retention_days out of range: {}",
                days
            )));
        }

        for spec in self.recovery.rules.iter().flatten() {
            if spec.cooldown_minutes < 0 || spec.cooldown().is_none() {
                return Err(EngineError::InvalidConfig(format!(
                    "cooldown_minutes for rule '{}' out of range: {}",
                    spec.name, spec.cooldown_minutes
                )));
            }
        }
        Ok(())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.recovery.max_concurrent_recoveries, 3);
        assert_eq!(config.recovery.error_retention_days, 30);
        assert_eq!(config.modification.max_concurrent_modifications, 2);
        assert!(config.modification.safety_checks_enabled);
        assert!(config.modification.auto_rollback_on_failure);
        assert_eq!(config.loops.detection_interval_secs, 30);
        assert_eq!(config.loops.detection_backoff_secs, 60);
        assert!(config.recovery.rules.is_none());
    }

    #[test]
    fn test_partial_override() {
        let toml = r#"
            [recovery]
            max_concurrent_recoveries = 1

            [modification]
            auto_rollback_on_failure = false
            max_cpu_percent = 75.0
        "#;

        let config = EngineConfig::from_toml(toml).unwrap();
        assert_eq!(config.recovery.max_concurrent_recoveries, 1);
        assert_eq!(config.recovery.min_attempts_for_rate, 10);
        assert!(!config.modification.auto_rollback_on_failure);
        assert_eq!(config.modification.max_cpu_percent, 75.0);
        assert_eq!(config.modification.max_concurrent_modifications, 2);
    }

    #[test]
    fn test_rules_override() {
        let toml = r#"
            [[recovery.rules]]
            name = "cache_flush"
            error_pattern = "cache"
            category = "memory_system"
            severity = "low"
            actions = ["clear_cache"]
            cooldown_minutes = 1
        "#;

        let config = EngineConfig::from_toml(toml).unwrap();
        let rules = config.recovery.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "cache_flush");
        assert_eq!(rules[0].max_attempts, 3);
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        let retention =
            EngineConfig::from_toml("[recovery]\nerror_retention_days = 9223372036854775807");
        assert!(matches!(retention, Err(EngineError::InvalidConfig(_))));

        let cooldown = EngineConfig::from_toml(
            r#"
            [[recovery.rules]]
            name = "forever"
            error_pattern = "cache"
            category = "memory_system"
            severity = "low"
            actions = ["clear_cache"]
            cooldown_minutes = 9223372036854775807
        "#,
        );
        assert!(matches!(cooldown, Err(EngineError::InvalidConfig(_))));

        let config = RecoveryConfig {
            error_retention_days: i64::MAX,
            ..RecoveryConfig::default()
        };
        assert_eq!(config.retention(), chrono::Duration::MAX);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(EngineConfig::from_toml("[recovery\nmax = ").is_err());
    }
}
