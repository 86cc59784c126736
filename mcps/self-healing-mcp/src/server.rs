//! Self-Healing MCP server implementation

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};

use crate::handlers;
use crate::params::*;
use crate::services::Services;

/// Self-Healing MCP server
#[derive(Clone)]
pub struct SelfHealingMcpServer {
    pub(crate) services: Services,
    tool_router: ToolRouter<Self>,
}

impl SelfHealingMcpServer {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            tool_router: Self::tool_router(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }
}

// MCP tool router
#[tool_router]
impl SelfHealingMcpServer {
    #[tool(
        description = "Report a runtime error. It is classified, merged with identical earlier reports, and a matching recovery rule is started when one is eligible"
    )]
    async fn report_error(
        &self,
        Parameters(params): Parameters<ReportErrorParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::report_error(self, params).await
    }

    #[tool(
        description = "Error recovery status: emergency mode, error counts, active recoveries and recent errors"
    )]
    async fn get_error_recovery_status(&self) -> Result<CallToolResult, McpError> {
        handlers::get_error_recovery_status(self).await
    }

    #[tool(
        description = "Self-modification status: active, queued and completed tasks, agent capabilities and safety settings"
    )]
    async fn get_self_modification_status(&self) -> Result<CallToolResult, McpError> {
        handlers::get_self_modification_status(self).await
    }

    #[tool(
        description = "Overall health score with per-component scores, active issues and recommendations"
    )]
    async fn get_system_health(&self) -> Result<CallToolResult, McpError> {
        handlers::get_system_health(self).await
    }

    #[tool(description = "List tracked error events, most recent first")]
    async fn list_error_events(
        &self,
        Parameters(params): Parameters<ListErrorEventsParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::list_error_events(self, params).await
    }

    #[tool(description = "List recovery rules with their cooldowns and success statistics")]
    async fn list_recovery_rules(&self) -> Result<CallToolResult, McpError> {
        handlers::list_recovery_rules(self).await
    }

    #[tool(description = "Clear emergency mode so automatic recoveries can run again")]
    async fn clear_emergency_mode(&self) -> Result<CallToolResult, McpError> {
        handlers::clear_emergency_mode(self).await
    }

    #[tool(
        description = "Enable or disable automatic recoveries and task execution. Errors are still recorded while disabled"
    )]
    async fn set_automation(
        &self,
        Parameters(params): Parameters<SetAutomationParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::set_automation(self, params).await
    }

    #[tool(
        description = "Run one task generation pass from current subsystem status and queue the new tasks"
    )]
    async fn generate_tasks(&self) -> Result<CallToolResult, McpError> {
        handlers::generate_tasks(self).await
    }

    #[tool(
        description = "Queue a self-modification task. Rejected if a task of the same type and scope is already open"
    )]
    async fn submit_task(
        &self,
        Parameters(params): Parameters<SubmitTaskParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::submit_task(self, params).await
    }

    #[tool(description = "List queued, active and finished modification tasks")]
    async fn list_tasks(
        &self,
        Parameters(params): Parameters<ListTasksParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::list_tasks(self, params).await
    }

    #[tool(
        description = "List persisted audit records (error events, recovery attempts, task outcomes), newest first"
    )]
    async fn list_audit_records(
        &self,
        Parameters(params): Parameters<ListAuditRecordsParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::list_audit_records(self, params).await
    }
}

#[tool_handler]
impl rmcp::ServerHandler for SelfHealingMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Self-healing control loop: error classification with automatic recovery \
                 rules, and a scheduler for self-modification tasks with verification and \
                 rollback."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
