//! Handler implementations for self-healing MCP tools

use healing_engine::modification::{
    ModificationScope, ModificationTask, ModificationType, TaskStatus,
};
use healing_engine::recovery::ErrorCategory;
use healing_engine::ErrorReport;
use rmcp::{model::CallToolResult, ErrorData as McpError};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::params::*;
use crate::respond::{engine_error, internal_error, invalid_params, json_success};
use crate::server::SelfHealingMcpServer;

/// Parse a snake_case enum name the same way the wire format spells it
fn parse_enum<T: DeserializeOwned>(field: &str, value: &str) -> Result<T, McpError> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| invalid_params(format!("Unknown {}: {}", field, value)))
}

/// Classify a runtime error and start recovery, or queue it for detection
pub async fn report_error(
    server: &SelfHealingMcpServer,
    params: ReportErrorParams,
) -> Result<CallToolResult, McpError> {
    let mut report = ErrorReport::new(params.component, params.error_type, params.message);
    if let Some(trace) = params.trace {
        report = report.with_trace(trace);
    }
    if let Some(metadata) = params.metadata {
        report.metadata = metadata;
    }

    if params.deferred {
        let seq = server
            .services
            .store
            .enqueue_signal(&report)
            .map_err(|e| internal_error(format!("Failed to queue signal: {}", e)))?;
        return json_success(&json!({ "queued": true, "signal_id": seq }));
    }

    let reported = server
        .services
        .recovery
        .report(report)
        .await
        .map_err(engine_error)?;

    let (recovery_rule, outcome) = match reported.recovery {
        Some(handle) if params.wait => {
            let rule = handle.rule.clone();
            (Some(rule), handle.wait().await)
        }
        Some(handle) => (Some(handle.rule), None),
        None => (None, None),
    };

    json_success(&json!({
        "event_id": reported.event_id,
        "severity": reported.severity,
        "category": reported.category,
        "recurrence_count": reported.recurrence_count,
        "recovery_started": recovery_rule.is_some(),
        "recovery_rule": recovery_rule,
        "outcome": outcome,
    }))
}

pub async fn get_error_recovery_status(
    server: &SelfHealingMcpServer,
) -> Result<CallToolResult, McpError> {
    json_success(&server.services.facade.error_recovery_status())
}

pub async fn get_self_modification_status(
    server: &SelfHealingMcpServer,
) -> Result<CallToolResult, McpError> {
    json_success(&server.services.facade.self_modification_status())
}

pub async fn get_system_health(server: &SelfHealingMcpServer) -> Result<CallToolResult, McpError> {
    json_success(&server.services.facade.system_health().await)
}

pub async fn list_error_events(
    server: &SelfHealingMcpServer,
    params: ListErrorEventsParams,
) -> Result<CallToolResult, McpError> {
    let category = params
        .category
        .as_deref()
        .map(|c| parse_enum::<ErrorCategory>("category", c))
        .transpose()?;

    let mut events = server.services.recovery.events().map_err(engine_error)?;
    events.retain(|event| {
        !(params.unresolved_only && event.resolved)
            && category.map_or(true, |c| event.category == c)
    });
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(params.limit);

    json_success(&json!({ "count": events.len(), "events": events }))
}

pub async fn list_recovery_rules(
    server: &SelfHealingMcpServer,
) -> Result<CallToolResult, McpError> {
    let rules = server.services.recovery.rules().map_err(engine_error)?;
    json_success(&json!({ "count": rules.len(), "rules": rules }))
}

pub async fn clear_emergency_mode(
    server: &SelfHealingMcpServer,
) -> Result<CallToolResult, McpError> {
    let was_active = server.services.ctx.clear_emergency_mode();
    if was_active {
        tracing::warn!("Emergency mode cleared by operator");
    }
    json_success(&json!({ "cleared": was_active, "emergency_mode_active": false }))
}

pub async fn set_automation(
    server: &SelfHealingMcpServer,
    params: SetAutomationParams,
) -> Result<CallToolResult, McpError> {
    server.services.ctx.set_automation_enabled(params.enabled);
    tracing::info!(enabled = params.enabled, "Automation toggled by operator");
    json_success(&json!({ "automation_enabled": params.enabled }))
}

/// Run one generation pass now instead of waiting for the loop
pub async fn generate_tasks(server: &SelfHealingMcpServer) -> Result<CallToolResult, McpError> {
    let ids = server
        .services
        .loops
        .generate_once()
        .await
        .map_err(|e| internal_error(format!("Task generation failed: {}", e)))?;

    let mut tasks = Vec::with_capacity(ids.len());
    for id in &ids {
        tasks.push(server.services.scheduler.task(id).map_err(engine_error)?.summary());
    }
    json_success(&json!({ "queued": tasks.len(), "tasks": tasks }))
}

pub async fn submit_task(
    server: &SelfHealingMcpServer,
    params: SubmitTaskParams,
) -> Result<CallToolResult, McpError> {
    let task_type: ModificationType = parse_enum("task_type", &params.task_type)?;
    let scope: ModificationScope = parse_enum("scope", &params.scope)?;
    if params.description.trim().is_empty() {
        return Err(invalid_params("description must not be empty"));
    }

    let mut task = ModificationTask::new(task_type, scope, params.description, chrono::Utc::now())
        .with_targets(params.target_files)
        .with_criteria(params.success_criteria)
        .with_metadata("source", json!("operator"));
    if let Some(priority) = params.priority {
        task = task.with_priority(priority);
    }
    if let Some(complexity) = params.complexity {
        task = task.with_complexity(complexity);
    }
    if let Some(plan) = params.rollback_plan {
        task = task.with_rollback_plan(plan);
    }

    let id = server.services.scheduler.submit(task).await.map_err(engine_error)?;
    json_success(&json!({ "task_id": id, "status": TaskStatus::Pending }))
}

pub async fn list_tasks(
    server: &SelfHealingMcpServer,
    params: ListTasksParams,
) -> Result<CallToolResult, McpError> {
    let status = params
        .status
        .as_deref()
        .map(|s| parse_enum::<TaskStatus>("status", s))
        .transpose()?;

    let mut tasks = server.services.scheduler.tasks().map_err(engine_error)?;
    if let Some(status) = status {
        tasks.retain(|task| task.status == status);
    }
    tasks.truncate(params.limit);

    json_success(&json!({ "count": tasks.len(), "tasks": tasks }))
}

pub async fn list_audit_records(
    server: &SelfHealingMcpServer,
    params: ListAuditRecordsParams,
) -> Result<CallToolResult, McpError> {
    let records = server
        .services
        .store
        .records(params.kind.as_deref(), params.limit)
        .map_err(|e| internal_error(format!("Failed to read audit records: {}", e)))?;
    json_success(&json!({ "count": records.len(), "records": records }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::services::Services;
    use crate::store::SqliteStore;
    use rmcp::model::ErrorCode;

    fn server() -> (SelfHealingMcpServer, tempfile::TempDir) {
        let inbox = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.notifications.inbox_path = inbox.path().to_string_lossy().to_string();

        let services = Services::build(&config, SqliteStore::open_in_memory().unwrap()).unwrap();
        (SelfHealingMcpServer::new(services), inbox)
    }

    fn body(result: CallToolResult) -> Value {
        let text = result
            .content
            .iter()
            .find_map(|c| match &c.raw {
                rmcp::model::RawContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .unwrap();
        serde_json::from_str(text).unwrap()
    }

    fn report(message: &str) -> ReportErrorParams {
        ReportErrorParams {
            component: "provider_router".to_string(),
            error_type: "provider_error".to_string(),
            message: message.to_string(),
            trace: None,
            metadata: None,
            deferred: false,
            wait: true,
        }
    }

    #[tokio::test]
    async fn test_report_error_runs_recovery() {
        let (server, _inbox) = server();

        let params = report("timeout waiting for provider openai");
        let out = body(report_error(&server, params).await.unwrap());
        assert_eq!(out["category"], "provider_failure");
        assert_eq!(out["recovery_rule"], "provider_timeout_failover");
        assert_eq!(out["outcome"]["success"], true);

        let events = body(
            list_error_events(
                &server,
                ListErrorEventsParams { limit: 10, unresolved_only: false, category: None },
            )
            .await
            .unwrap(),
        );
        assert_eq!(events["count"], 1);
        assert_eq!(events["events"][0]["resolved"], true);

        let attempts = body(
            list_audit_records(
                &server,
                ListAuditRecordsParams { kind: Some("recovery_attempt".to_string()), limit: 10 },
            )
            .await
            .unwrap(),
        );
        assert_eq!(attempts["count"], 1);
    }

    #[tokio::test]
    async fn test_deferred_report_is_queued_for_detection() {
        let (server, _inbox) = server();

        let mut params = report("database connection refused");
        params.deferred = true;
        let out = body(report_error(&server, params).await.unwrap());
        assert_eq!(out["queued"], true);
        assert_eq!(server.services.recovery.events().unwrap().len(), 0);

        assert_eq!(server.services.loops.detect_once().await.unwrap(), 1);
        assert_eq!(server.services.recovery.events().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_emergency_mode_round_trip() {
        let (server, inbox) = server();

        body(report_error(&server, report("fatal provider crash")).await.unwrap());
        assert!(server.services.ctx.is_emergency_mode_active());

        let status = body(get_error_recovery_status(&server).await.unwrap());
        assert_eq!(status["emergency_mode_active"], true);

        let out = body(clear_emergency_mode(&server).await.unwrap());
        assert_eq!(out["cleared"], true);
        assert!(!server.services.ctx.is_emergency_mode_active());

        // the inbox got an urgent entry
        let entries = std::fs::read_dir(inbox.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_submit_task_validates_and_rejects_duplicates() {
        let (server, _inbox) = server();

        let params = SubmitTaskParams {
            task_type: "bug_fix".to_string(),
            scope: "module".to_string(),
            description: "Fix retry loop in provider router".to_string(),
            priority: Some(2),
            complexity: None,
            target_files: vec!["src/router.rs".to_string()],
            success_criteria: vec![],
            rollback_plan: None,
        };

        let out = body(submit_task(&server, params.clone()).await.unwrap());
        assert!(out["task_id"].as_str().unwrap().starts_with("error_"));

        let err = submit_task(&server, params.clone()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let mut unknown = params;
        unknown.task_type = "refactor_everything".to_string();
        let err = submit_task(&server, unknown).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let tasks = body(
            list_tasks(&server, ListTasksParams { status: Some("pending".to_string()), limit: 10 })
                .await
                .unwrap(),
        );
        assert_eq!(tasks["count"], 1);
    }

    #[tokio::test]
    async fn test_unknown_category_is_invalid() {
        let (server, _inbox) = server();
        let err = list_error_events(
            &server,
            ListErrorEventsParams {
                limit: 5,
                unresolved_only: false,
                category: Some("gremlins".to_string()),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_automation_toggle_and_health() {
        let (server, _inbox) = server();

        body(set_automation(&server, SetAutomationParams { enabled: false }).await.unwrap());
        let params = report("timeout waiting for provider openai");
        let out = body(report_error(&server, params).await.unwrap());
        assert_eq!(out["recovery_started"], false);

        let health = body(get_system_health(&server).await.unwrap());
        assert!(health["component_scores"]["error_recovery"].is_number());

        let generated = body(generate_tasks(&server).await.unwrap());
        assert!(generated["queued"].is_number());

        let rules = body(list_recovery_rules(&server).await.unwrap());
        assert_eq!(rules["count"], 6);
    }
}
