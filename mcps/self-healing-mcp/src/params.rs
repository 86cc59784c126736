//! Parameter types for self-healing MCP tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters for report_error
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReportErrorParams {
    /// Component that produced the error (e.g. "provider_router", "redis")
    pub component: String,

    /// Error type or exception name
    pub error_type: String,

    /// Error message, used for classification and deduplication
    pub message: String,

    /// Stack trace or other diagnostic text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,

    /// Free-form metadata attached to the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    /// Queue the signal for the detection loop instead of classifying now
    #[serde(default)]
    pub deferred: bool,

    /// Wait for a started recovery to finish before returning
    #[serde(default)]
    pub wait: bool,
}

/// Parameters for list_error_events
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListErrorEventsParams {
    /// Maximum number of events, most recent first
    #[serde(default = "default_event_limit")]
    pub limit: usize,

    /// Only return events that are not resolved
    #[serde(default)]
    pub unresolved_only: bool,

    /// Filter by category (e.g. "provider_failure", "memory_system")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

fn default_event_limit() -> usize {
    20
}

/// Parameters for set_automation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SetAutomationParams {
    /// false stops new recoveries and task admissions; reporting continues
    pub enabled: bool,
}

/// Parameters for submit_task
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmitTaskParams {
    /// code_optimization, configuration_tuning, new_feature_addition, bug_fix,
    /// performance_enhancement, security_improvement, architecture_refinement
    /// or integration_addition
    pub task_type: String,

    /// single_file, module, subsystem or system_wide
    pub scope: String,

    /// What the change should accomplish
    pub description: String,

    /// 1 (highest) to 10 (lowest), default 5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    /// 1 (simple) to 10 (complex), default 5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<u8>,

    /// Files the change touches; overlapping tasks are not run together
    #[serde(default)]
    pub target_files: Vec<String>,

    #[serde(default)]
    pub success_criteria: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_plan: Option<String>,
}

/// Parameters for list_tasks
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListTasksParams {
    /// Filter by status (pending, in_progress, completed, failed, rolled_back)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default = "default_task_limit")]
    pub limit: usize,
}

fn default_task_limit() -> usize {
    50
}

/// Parameters for list_audit_records
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListAuditRecordsParams {
    /// Filter by record kind (e.g. "recovery_attempt", "modification_rollback")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default = "default_task_limit")]
    pub limit: usize,
}
