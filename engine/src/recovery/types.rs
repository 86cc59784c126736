//! Error event model for the recovery engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::ports::ErrorReport;

/// Error severity, ordered low < medium < high < critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Severity used for an event that keeps recurring
    pub fn escalated(self) -> Severity {
        match self {
            Severity::Medium => Severity::High,
            _ => Severity::Critical,
        }
    }
}

/// Failure domain of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ProviderFailure,
    MemorySystem,
    McpServer,
    DatabaseConnection,
    NetworkTimeout,
    Configuration,
    DependencyMissing,
    PerformanceDegradation,
    Authentication,
    ResourceExhaustion,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ProviderFailure => "provider_failure",
            ErrorCategory::MemorySystem => "memory_system",
            ErrorCategory::McpServer => "mcp_server",
            ErrorCategory::DatabaseConnection => "database_connection",
            ErrorCategory::NetworkTimeout => "network_timeout",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::DependencyMissing => "dependency_missing",
            ErrorCategory::PerformanceDegradation => "performance_degradation",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
        }
    }
}

/// Compensating actions a recovery rule can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    RestartService,
    FailoverProvider,
    ClearCache,
    ResetConnection,
    InstallDependency,
    RollbackConfig,
    ScaleResources,
    SwitchMcpServer,
    EmergencyMode,
    RestartComponent,
}

impl RecoveryAction {
    pub const ALL: [RecoveryAction; 10] = [
        RecoveryAction::RestartService,
        RecoveryAction::FailoverProvider,
        RecoveryAction::ClearCache,
        RecoveryAction::ResetConnection,
        RecoveryAction::InstallDependency,
        RecoveryAction::RollbackConfig,
        RecoveryAction::ScaleResources,
        RecoveryAction::SwitchMcpServer,
        RecoveryAction::EmergencyMode,
        RecoveryAction::RestartComponent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::RestartService => "restart_service",
            RecoveryAction::FailoverProvider => "failover_provider",
            RecoveryAction::ClearCache => "clear_cache",
            RecoveryAction::ResetConnection => "reset_connection",
            RecoveryAction::InstallDependency => "install_dependency",
            RecoveryAction::RollbackConfig => "rollback_config",
            RecoveryAction::ScaleResources => "scale_resources",
            RecoveryAction::SwitchMcpServer => "switch_mcp_server",
            RecoveryAction::EmergencyMode => "emergency_mode",
            RecoveryAction::RestartComponent => "restart_component",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dedup key for error events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorSignature {
    pub component: String,
    pub error_type: String,
    pub message_hash: u64,
}

impl ErrorSignature {
    pub fn of(component: &str, error_type: &str, message: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        message.hash(&mut hasher);
        Self {
            component: component.to_string(),
            error_type: error_type.to_string(),
            message_hash: hasher.finish(),
        }
    }
}

impl fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{:016x}",
            self.component, self.error_type, self.message_hash
        )
    }
}

/// A detected error, merged across recurrences of the same signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub id: String,
    pub signature: ErrorSignature,
    /// Time of the most recent detection
    pub timestamp: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    pub error_type: String,
    pub message: String,
    pub trace: String,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub component: String,
    pub metadata: Map<String, Value>,
    pub resolved: bool,
    pub resolution_timestamp: Option<DateTime<Utc>>,
    pub recovery_actions_taken: Vec<RecoveryAction>,
    pub recurrence_count: u32,
}

impl ErrorEvent {
    pub fn new(
        report: ErrorReport,
        severity: Severity,
        category: ErrorCategory,
        now: DateTime<Utc>,
    ) -> Self {
        let signature = ErrorSignature::of(&report.component, &report.error_type, &report.message);
        Self {
            id: format!(
                "{}_{}_{}_{:08x}",
                report.component,
                report.error_type,
                now.timestamp(),
                signature.message_hash as u32
            ),
            signature,
            timestamp: now,
            first_seen: now,
            error_type: report.error_type,
            message: report.message,
            trace: report.trace,
            severity,
            category,
            component: report.component,
            metadata: report.metadata,
            resolved: false,
            resolution_timestamp: None,
            recovery_actions_taken: Vec::new(),
            recurrence_count: 1,
        }
    }

    /// Fold a re-detection into this event
    pub fn record_recurrence(
        &mut self,
        severity: Severity,
        escalation_threshold: u32,
        now: DateTime<Utc>,
    ) {
        self.recurrence_count += 1;
        self.timestamp = now;
        self.severity = if self.recurrence_count > escalation_threshold {
            severity.escalated()
        } else {
            severity
        };
        if self.resolved {
            self.resolved = false;
            self.resolution_timestamp = None;
        }
    }

    pub fn mark_resolved(&mut self, now: DateTime<Utc>) {
        self.resolved = true;
        self.resolution_timestamp = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_escalation() {
        assert_eq!(Severity::Medium.escalated(), Severity::High);
        assert_eq!(Severity::High.escalated(), Severity::Critical);
        assert_eq!(Severity::Critical.escalated(), Severity::Critical);
        assert_eq!(Severity::Low.escalated(), Severity::Critical);
    }

    #[test]
    fn test_signature_depends_on_message() {
        let a = ErrorSignature::of("db", "query_error", "connection lost");
        let b = ErrorSignature::of("db", "query_error", "connection lost");
        let c = ErrorSignature::of("db", "query_error", "syntax error");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.to_string().starts_with("db:query_error:"));
    }

    #[test]
    fn test_recurrence_reopens_and_escalates() {
        let now = Utc::now();
        let report = ErrorReport::new("cache", "cache_error", "cache error");
        let mut event = ErrorEvent::new(report, Severity::Medium, ErrorCategory::MemorySystem, now);
        event.mark_resolved(now);

        for _ in 0..4 {
            event.record_recurrence(Severity::Medium, 5, now);
        }
        assert_eq!(event.recurrence_count, 5);
        assert_eq!(event.severity, Severity::Medium);
        assert!(!event.resolved);
        assert!(event.resolution_timestamp.is_none());

        event.record_recurrence(Severity::Medium, 5, now);
        assert_eq!(event.recurrence_count, 6);
        assert_eq!(event.severity, Severity::High);
    }

    #[test]
    fn test_action_serde_names() {
        let json = serde_json::to_string(&RecoveryAction::SwitchMcpServer).unwrap();
        assert_eq!(json, "\"switch_mcp_server\"");
        assert_eq!(RecoveryAction::EmergencyMode.to_string(), "emergency_mode");
    }
}
