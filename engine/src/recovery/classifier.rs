//! Keyword classification of raw error signals
//!
//! Both functions are pure: lowercase the message, walk a fixed keyword
//! table in priority order, return the first hit or the default.

use super::types::{ErrorCategory, Severity};

const CRITICAL_TERMS: &[&str] = &["critical", "fatal", "system failure", "crash"];
const HIGH_TERMS: &[&str] = &["connection", "timeout", "authentication", "permission"];
const MEDIUM_TERMS: &[&str] = &["error", "failed", "exception"];

const CATEGORY_TABLE: &[(&[&str], ErrorCategory)] = &[
    (&["provider", "completion"], ErrorCategory::ProviderFailure),
    (&["memory", "cache"], ErrorCategory::MemorySystem),
    (&["mcp", "server"], ErrorCategory::McpServer),
    (&["database", "sql"], ErrorCategory::DatabaseConnection),
    (&["timeout", "network"], ErrorCategory::NetworkTimeout),
    (&["config", "setting"], ErrorCategory::Configuration),
    (&["dependency", "import"], ErrorCategory::DependencyMissing),
    (&["performance", "slow"], ErrorCategory::PerformanceDegradation),
    (&["auth", "token"], ErrorCategory::Authentication),
    (&["disk", "resource"], ErrorCategory::ResourceExhaustion),
];

const DEFAULT_CATEGORY: ErrorCategory = ErrorCategory::Configuration;

fn contains_any(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| haystack.contains(term))
}

/// Classify how severe an error is from its message
pub fn classify_severity(_error_type: &str, message: &str, _component: &str) -> Severity {
    let message = message.to_lowercase();

    if contains_any(&message, CRITICAL_TERMS) {
        Severity::Critical
    } else if contains_any(&message, HIGH_TERMS) {
        Severity::High
    } else if contains_any(&message, MEDIUM_TERMS) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Classify which failure domain an error belongs to
pub fn classify_category(_error_type: &str, message: &str, _component: &str) -> ErrorCategory {
    let message = message.to_lowercase();

    CATEGORY_TABLE
        .iter()
        .find(|(terms, _)| contains_any(&message, terms))
        .map(|(_, category)| *category)
        .unwrap_or(DEFAULT_CATEGORY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn severity(message: &str) -> Severity {
        classify_severity("any", message, "any")
    }

    fn category(message: &str) -> ErrorCategory {
        classify_category("any", message, "any")
    }

    #[test]
    fn test_critical_terms_win() {
        assert_eq!(severity("FATAL: worker exited"), Severity::Critical);
        assert_eq!(severity("process Crash during connection timeout"), Severity::Critical);
        assert_eq!(severity("Critical error"), Severity::Critical);
    }

    #[test]
    fn test_high_terms() {
        assert_eq!(severity("Connection refused"), Severity::High);
        assert_eq!(severity("request TIMEOUT error"), Severity::High);
        assert_eq!(severity("authentication rejected"), Severity::High);
        assert_eq!(severity("permission denied"), Severity::High);
    }

    #[test]
    fn test_medium_and_low() {
        assert_eq!(severity("job failed"), Severity::Medium);
        assert_eq!(severity("unhandled Exception"), Severity::Medium);
        assert_eq!(severity("queue depth 12"), Severity::Low);
        assert_eq!(severity(""), Severity::Low);
    }

    #[test]
    fn test_category_priority_order() {
        assert_eq!(category("completion provider down"), ErrorCategory::ProviderFailure);
        // "cache" is checked before "server"
        assert_eq!(category("cache server evicted"), ErrorCategory::MemorySystem);
        assert_eq!(category("MCP tool failed"), ErrorCategory::McpServer);
        assert_eq!(category("SQL deadlock"), ErrorCategory::DatabaseConnection);
        assert_eq!(category("network unreachable"), ErrorCategory::NetworkTimeout);
        assert_eq!(category("missing import foo"), ErrorCategory::DependencyMissing);
        assert_eq!(category("slow responses"), ErrorCategory::PerformanceDegradation);
        assert_eq!(category("token expired"), ErrorCategory::Authentication);
        assert_eq!(category("disk full"), ErrorCategory::ResourceExhaustion);
    }

    #[test]
    fn test_category_default() {
        assert_eq!(category("something odd happened"), ErrorCategory::Configuration);
    }
}
