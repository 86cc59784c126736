//! Inbox notification integration
//!
//! Writes notifications to the markdown inbox (~/.notes/inbox/) in the same
//! format as inbox-mcp, so alerts reach the operator without inbox-mcp
//! running. [`InboxNotifier`] is an audit sink that only forwards the record
//! kinds an operator has to act on.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use healing_engine::{AuditRecord, AuditSink};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Priority level for inbox messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
    Urgent,
}

impl Priority {
    fn to_markdown(self) -> &'static str {
        match self {
            Priority::Normal => "",
            Priority::High => "*[HIGH]*",
            Priority::Urgent => "**[URGENT]**",
        }
    }
}

/// Append a notification to today's inbox file in `inbox_path`
pub async fn send_notification(
    inbox_path: &Path,
    message: &str,
    priority: Priority,
    tags: &[&str],
) -> Result<()> {
    fs::create_dir_all(inbox_path).await?;

    let now = Local::now();
    let file_path = inbox_path.join(format!("{}.md", now.format("%Y-%m-%d")));

    // ## YYYY-MM-DD HH:MM:SS [source] #tag1 #tag2 *[priority]*
    let tags_str = tags
        .iter()
        .map(|t| format!("#{}", t))
        .collect::<Vec<_>>()
        .join(" ");

    let header = format!(
        "## {} [self-heal] {} {}",
        now.format("%Y-%m-%d %H:%M:%S"),
        tags_str,
        priority.to_markdown()
    )
    .trim()
    .to_string();

    let content = format!("{}\n\n{}", header, message);

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&file_path)
        .await?;

    let metadata = file.metadata().await?;
    let full_content = if metadata.len() > 0 {
        format!("\n---\n\n{}\n", content)
    } else {
        format!("# Inbox - {}\n\n{}\n", now.format("%Y-%m-%d"), content)
    };

    file.write_all(full_content.as_bytes()).await?;

    Ok(())
}

const EMERGENCY_TAGS: &[&str] = &["emergency", "self-heal"];
const ROLLBACK_TAGS: &[&str] = &["rollback", "self-heal"];
const ROLLBACK_FAILED_TAGS: &[&str] = &["rollback", "failed", "self-heal"];

fn field<'a>(payload: &'a Value, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or("unknown")
}

/// Message, priority and tags for the record kinds worth an alert
fn render(record: &AuditRecord) -> Option<(String, Priority, &'static [&'static str])> {
    let payload = &record.payload;
    match record.kind.as_str() {
        "emergency_mode" => Some((
            format!(
                "Emergency mode activated by rule {}:\n\
                 - Error: {}\n\
                 - Event: {}\n\n\
                 Automatic recoveries are suspended until emergency mode is cleared \
                 (clear_emergency_mode).",
                field(payload, "rule_name"),
                field(payload, "message"),
                field(payload, "error_id"),
            ),
            Priority::Urgent,
            EMERGENCY_TAGS,
        )),
        "modification_rollback" => Some((
            format!(
                "Rolled back modification task {} ({}).",
                field(payload, "task_id"),
                field(payload, "reason"),
            ),
            Priority::High,
            ROLLBACK_TAGS,
        )),
        "modification_rollback_failed" => Some((
            format!(
                "Rollback FAILED for modification task {} ({}):\n{}\n\n\
                 Target files may be left modified. Manual review required.",
                field(payload, "task_id"),
                field(payload, "reason"),
                field(payload, "error"),
            ),
            Priority::Urgent,
            ROLLBACK_FAILED_TAGS,
        )),
        _ => None,
    }
}

/// Audit sink that turns operator-relevant records into inbox entries
#[derive(Debug, Clone)]
pub struct InboxNotifier {
    inbox_path: PathBuf,
}

impl InboxNotifier {
    pub fn new(inbox_path: impl Into<PathBuf>) -> Self {
        Self {
            inbox_path: inbox_path.into(),
        }
    }
}

#[async_trait]
impl AuditSink for InboxNotifier {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        let Some((message, priority, tags)) = render(&record) else {
            return Ok(());
        };
        send_notification(&self.inbox_path, &message, priority, tags).await
    }
}

/// Hands every record to each inner sink
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl AuditSink for FanoutSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.record(record.clone()).await {
                failures.push(e.to_string());
            }
        }
        if !failures.is_empty() {
            anyhow::bail!("{} sink(s) failed: {}", failures.len(), failures.join("; "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healing_engine::RetentionTier;
    use serde_json::json;

    fn today_file(dir: &Path) -> PathBuf {
        dir.join(format!("{}.md", Local::now().format("%Y-%m-%d")))
    }

    #[tokio::test]
    async fn test_emergency_record_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = InboxNotifier::new(dir.path());

        notifier
            .record(AuditRecord::new(
                "emergency_mode",
                RetentionTier::Analytics,
                json!({
                    "rule_name": "critical_emergency_mode",
                    "message": "fatal provider crash",
                    "error_id": "e1"
                }),
            ))
            .await
            .unwrap();

        let content = std::fs::read_to_string(today_file(dir.path())).unwrap();
        assert!(content.starts_with("# Inbox - "));
        assert!(content.contains("[self-heal] #emergency #self-heal **[URGENT]**"));
        assert!(content.contains("critical_emergency_mode"));
    }

    #[tokio::test]
    async fn test_routine_records_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = InboxNotifier::new(dir.path());

        notifier
            .record(AuditRecord::new("error_event", RetentionTier::Analytics, json!({})))
            .await
            .unwrap();

        assert!(!today_file(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_second_entry_gets_separator() {
        let dir = tempfile::tempdir().unwrap();
        send_notification(dir.path(), "one", Priority::Normal, &["a"])
            .await
            .unwrap();
        send_notification(dir.path(), "two", Priority::High, &["b"])
            .await
            .unwrap();

        let content = std::fs::read_to_string(today_file(dir.path())).unwrap();
        assert_eq!(content.matches("# Inbox - ").count(), 1);
        assert!(content.contains("\n---\n\n## "));
        assert!(content.contains("*[HIGH]*"));
    }

    struct Failing;

    #[async_trait]
    impl AuditSink for Failing {
        async fn record(&self, _record: AuditRecord) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let fanout = FanoutSink::new()
            .with(Arc::new(Failing))
            .with(Arc::new(InboxNotifier::new(dir.path())));

        let result = fanout
            .record(AuditRecord::new(
                "modification_rollback",
                RetentionTier::Analytics,
                json!({ "task_id": "error_1", "reason": "verification_failed" }),
            ))
            .await;

        assert!(result.unwrap_err().to_string().contains("disk full"));
        let content = std::fs::read_to_string(today_file(dir.path())).unwrap();
        assert!(content.contains("Rolled back modification task error_1"));
    }
}
