//! Tool response helpers

use healing_engine::EngineError;
use rmcp::{
    model::{CallToolResult, Content},
    ErrorData as McpError,
};
use serde::Serialize;

/// Pretty-printed JSON tool result
pub fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

pub fn internal_error(message: impl Into<String>) -> McpError {
    McpError::internal_error(message.into(), None)
}

pub fn invalid_params(message: impl Into<String>) -> McpError {
    McpError::invalid_params(message.into(), None)
}

/// Caller mistakes become invalid params, everything else is internal
pub fn engine_error(err: EngineError) -> McpError {
    match err {
        EngineError::TaskRejected(_)
        | EngineError::TaskNotFound(_)
        | EngineError::EventNotFound(_)
        | EngineError::RuleNotFound(_)
        | EngineError::InvalidRulePattern { .. }
        | EngineError::DuplicateRule(_) => invalid_params(err.to_string()),
        other => internal_error(other.to_string()),
    }
}
