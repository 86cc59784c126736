//! Capabilities the engines consume from their surroundings
//!
//! - [`SignalSource`]: raw error entries, polled by the detection loop
//! - [`StatusProvider`]: per-subsystem metric snapshots for task generation
//! - [`AuditSink`]: fire-and-forget persistence of structured records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named metrics reported by one subsystem
pub type StatusSnapshot = Map<String, Value>;

/// A raw error signal as produced by log scanning or a probe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorReport {
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub trace: String,
    pub component: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ErrorReport {
    pub fn new(
        component: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            trace: String::new(),
            component: component.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Storage tier an audit record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTier {
    Session,
    Analytics,
    LongTerm,
}

impl RetentionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionTier::Session => "session",
            RetentionTier::Analytics => "analytics",
            RetentionTier::LongTerm => "long_term",
        }
    }
}

/// Structured record handed to an [`AuditSink`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Record kind, e.g. `error_event` or `modification_rollback`
    pub kind: String,
    pub tier: RetentionTier,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(kind: impl Into<String>, tier: RetentionTier, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            tier,
            payload,
            recorded_at: Utc::now(),
        }
    }
}

/// Source of raw error signals
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Return the signals that arrived since the previous poll
    async fn poll(&self) -> anyhow::Result<Vec<ErrorReport>>;
}

/// Snapshot provider for one subsystem
#[async_trait]
pub trait StatusProvider: Send + Sync {
    /// Subsystem name the snapshot is keyed under (e.g. `performance`)
    fn subsystem(&self) -> &str;

    async fn snapshot(&self) -> anyhow::Result<StatusSnapshot>;
}

/// Persistence sink for audit and analytics records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()>;
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl AuditSink for NullSink {
    async fn record(&self, _record: AuditRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Record to a sink without letting a sink failure reach the caller
pub(crate) async fn record_quietly(sink: &dyn AuditSink, record: AuditRecord) {
    let kind = record.kind.clone();
    if let Err(e) = sink.record(record).await {
        tracing::warn!(kind = %kind, "Failed to persist audit record: {}", e);
    }
}
