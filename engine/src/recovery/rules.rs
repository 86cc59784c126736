//! Recovery rule registry
//!
//! Rules are declared as [`RuleSpec`] (seed set or config), compiled once at
//! startup, and afterwards only their usage statistics change.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use super::types::{ErrorCategory, ErrorEvent, RecoveryAction, Severity};
use crate::error::{EngineError, EngineResult};

/// Declarative form of a recovery rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    /// Regex matched case-insensitively against the error message; empty matches all
    #[serde(default)]
    pub error_pattern: String,
    pub category: ErrorCategory,
    /// Minimum event severity the rule applies to
    pub severity: Severity,
    pub actions: Vec<RecoveryAction>,
    #[serde(default)]
    pub conditions: Map<String, Value>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    /// Observed success rate below which the rule is skipped
    #[serde(default = "default_success_rate_threshold")]
    pub success_rate_threshold: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_cooldown_minutes() -> i64 {
    10
}

fn default_success_rate_threshold() -> f64 {
    0.7
}

fn default_enabled() -> bool {
    true
}

impl RuleSpec {
    pub fn new(
        name: &str,
        error_pattern: &str,
        category: ErrorCategory,
        severity: Severity,
        actions: Vec<RecoveryAction>,
    ) -> Self {
        Self {
            name: name.to_string(),
            error_pattern: error_pattern.to_string(),
            category,
            severity,
            actions,
            conditions: Map::new(),
            max_attempts: default_max_attempts(),
            cooldown_minutes: default_cooldown_minutes(),
            success_rate_threshold: default_success_rate_threshold(),
            enabled: true,
        }
    }

    /// `None` when the minute count is beyond chrono's range
    pub fn cooldown(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_minutes(self.cooldown_minutes)
    }

    pub fn with_cooldown(mut self, minutes: i64) -> Self {
        self.cooldown_minutes = minutes;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_success_rate_threshold(mut self, threshold: f64) -> Self {
        self.success_rate_threshold = threshold;
        self
    }
}

/// Seed rule set installed when the config does not provide one
pub fn seed_rules() -> Vec<RuleSpec> {
    use ErrorCategory as C;
    use RecoveryAction as A;
    use Severity as S;

    vec![
        RuleSpec::new(
            "provider_timeout_failover",
            r"timeout.*provider",
            C::ProviderFailure,
            S::High,
            vec![A::FailoverProvider, A::ResetConnection],
        )
        .with_cooldown(5),
        RuleSpec::new(
            "memory_cache_clear",
            r"memory|cache",
            C::MemorySystem,
            S::Medium,
            vec![A::ClearCache, A::ScaleResources],
        )
        .with_cooldown(10),
        RuleSpec::new(
            "database_reconnect",
            r"database|connection.*lost",
            C::DatabaseConnection,
            S::High,
            vec![A::ResetConnection, A::RestartService],
        )
        .with_cooldown(5),
        RuleSpec::new(
            "mcp_server_switch",
            r"mcp.*server|tool.*failed",
            C::McpServer,
            S::Medium,
            vec![A::SwitchMcpServer, A::RestartComponent],
        )
        .with_cooldown(15),
        RuleSpec::new(
            "performance_optimization",
            r"slow|performance|degradation",
            C::PerformanceDegradation,
            S::Medium,
            vec![A::ScaleResources, A::ClearCache],
        )
        .with_cooldown(20),
        RuleSpec::new(
            "critical_emergency_mode",
            r"critical|fatal|system.*failure",
            C::ProviderFailure,
            S::Critical,
            vec![A::EmergencyMode, A::RollbackConfig],
        )
        .with_cooldown(30)
        .with_max_attempts(1),
    ]
}

/// Read-only view of a rule and its statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub name: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub actions: Vec<RecoveryAction>,
    pub enabled: bool,
    pub cooldown_minutes: i64,
    pub success_rate_threshold: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub success_count: u32,
    pub failure_count: u32,
    pub success_rate: Option<f64>,
}

/// A compiled recovery rule with its running statistics
#[derive(Debug, Clone)]
pub struct RecoveryRule {
    spec: RuleSpec,
    matcher: Option<Regex>,
    pub last_used: Option<DateTime<Utc>>,
    pub success_count: u32,
    pub failure_count: u32,
}

impl RecoveryRule {
    pub fn compile(spec: RuleSpec) -> EngineResult<Self> {
        if spec.cooldown_minutes < 0 || spec.cooldown().is_none() {
            return Err(EngineError::InvalidConfig(format!(
                "cooldown_minutes for rule '{}' out of range: {}",
                spec.name, spec.cooldown_minutes
            )));
        }

        let matcher = if spec.error_pattern.is_empty() {
            None
        } else {
            let regex = RegexBuilder::new(&spec.error_pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| EngineError::InvalidRulePattern {
                    name: spec.name.clone(),
                    source,
                })?;
            Some(regex)
        };

        Ok(Self {
            spec,
            matcher,
            last_used: None,
            success_count: 0,
            failure_count: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    pub fn actions(&self) -> &[RecoveryAction] {
        &self.spec.actions
    }

    pub fn is_enabled(&self) -> bool {
        self.spec.enabled
    }

    pub fn total_attempts(&self) -> u32 {
        self.success_count + self.failure_count
    }

    pub fn success_rate(&self) -> Option<f64> {
        match self.total_attempts() {
            0 => None,
            total => Some(self.success_count as f64 / total as f64),
        }
    }

    /// Whether the rule applies to the event at all
    pub fn matches(&self, event: &ErrorEvent) -> bool {
        if !self.spec.enabled || self.spec.category != event.category {
            return false;
        }
        if event.severity < self.spec.severity {
            return false;
        }
        match &self.matcher {
            Some(regex) => regex.is_match(&event.message),
            None => true,
        }
    }

    /// Whether the rule may run now given cooldown and its track record
    pub fn admits(&self, now: DateTime<Utc>, min_attempts_for_rate: u32) -> bool {
        if let Some(last_used) = self.last_used {
            let cooldown = self.spec.cooldown().unwrap_or(chrono::Duration::MAX);
            if now - last_used < cooldown {
                return false;
            }
        }

        if self.total_attempts() >= min_attempts_for_rate {
            if let Some(rate) = self.success_rate() {
                if rate < self.spec.success_rate_threshold {
                    return false;
                }
            }
        }

        true
    }

    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
    }

    pub fn snapshot(&self) -> RuleSnapshot {
        RuleSnapshot {
            name: self.spec.name.clone(),
            category: self.spec.category,
            severity: self.spec.severity,
            actions: self.spec.actions.clone(),
            enabled: self.spec.enabled,
            cooldown_minutes: self.spec.cooldown_minutes,
            success_rate_threshold: self.spec.success_rate_threshold,
            last_used: self.last_used,
            success_count: self.success_count,
            failure_count: self.failure_count,
            success_rate: self.success_rate(),
        }
    }
}

/// Ordered set of recovery rules, unique by name
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<RecoveryRule>,
}

impl RuleRegistry {
    pub fn from_specs(specs: Vec<RuleSpec>) -> EngineResult<Self> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.name.clone()) {
                return Err(EngineError::DuplicateRule(spec.name));
            }
            rules.push(RecoveryRule::compile(spec)?);
        }
        Ok(Self { rules })
    }

    pub fn seeded() -> EngineResult<Self> {
        Self::from_specs(seed_rules())
    }

    /// Rules applicable to the event, best candidates first.
    ///
    /// Ordered by success-rate floor ascending, then by number of actions
    /// descending; ties keep registry order.
    pub fn find_matching(&self, event: &ErrorEvent) -> Vec<&RecoveryRule> {
        let mut matching: Vec<&RecoveryRule> =
            self.rules.iter().filter(|rule| rule.matches(event)).collect();

        matching.sort_by(|a, b| {
            a.spec
                .success_rate_threshold
                .total_cmp(&b.spec.success_rate_threshold)
                .then_with(|| b.spec.actions.len().cmp(&a.spec.actions.len()))
        });

        matching
    }

    pub fn get(&self, name: &str) -> Option<&RecoveryRule> {
        self.rules.iter().find(|rule| rule.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RecoveryRule> {
        self.rules.iter_mut().find(|rule| rule.name() == name)
    }

    pub fn enabled_count(&self) -> usize {
        self.rules.iter().filter(|rule| rule.is_enabled()).count()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn snapshots(&self) -> Vec<RuleSnapshot> {
        self.rules.iter().map(RecoveryRule::snapshot).collect()
    }
}
