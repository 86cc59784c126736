//! SQLite persistence
//!
//! Two tables share one connection:
//! - `audit_records`: everything the engines hand to their audit sink,
//!   purged per retention tier
//! - `error_signals`: raw error entries written by other services (or by
//!   `report_error` with `deferred = true`), drained by the detection loop
//!   past a persisted watermark and deleted once handed out

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use healing_engine::{AuditRecord, AuditSink, ErrorReport, RetentionTier, SignalSource};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::StorageConfig;

/// Days each tier is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub session_days: i64,
    pub analytics_days: i64,
    pub long_term_days: i64,
}

impl RetentionPolicy {
    pub fn days(&self, tier: RetentionTier) -> i64 {
        match tier {
            RetentionTier::Session => self.session_days,
            RetentionTier::Analytics => self.analytics_days,
            RetentionTier::LongTerm => self.long_term_days,
        }
    }
}

impl From<&StorageConfig> for RetentionPolicy {
    fn from(config: &StorageConfig) -> Self {
        Self {
            session_days: config.session_retention_days,
            analytics_days: config.analytics_retention_days,
            long_term_days: config.long_term_retention_days,
        }
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn tier_from_str(tier: &str) -> Option<RetentionTier> {
    serde_json::from_value(Value::String(tier.to_string())).ok()
}

/// SQLite-backed audit sink and signal source
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    poll_batch: usize,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        tracing::info!("Opening database at: {}", path.display());
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        // WAL so external writers can append signals while we read
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;

        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            poll_batch: 100,
        })
    }

    pub fn with_poll_batch(mut self, poll_batch: usize) -> Self {
        self.poll_batch = poll_batch.max(1);
        self
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_records (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                tier TEXT NOT NULL,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_kind ON audit_records(kind);
            CREATE INDEX IF NOT EXISTS idx_audit_tier_time ON audit_records(tier, recorded_at);

            CREATE TABLE IF NOT EXISTS error_signals (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                component TEXT NOT NULL,
                error_type TEXT NOT NULL,
                message TEXT NOT NULL,
                trace TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS signal_watermark (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_seq INTEGER NOT NULL
            );
            "#,
        )
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("Failed to acquire database lock: {}", e))
    }

    // ========================================================================
    // Audit records
    // ========================================================================

    pub fn insert_record(&self, record: &AuditRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO audit_records (id, kind, tier, payload, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Uuid::new_v4().to_string(),
                record.kind,
                record.tier.as_str(),
                serde_json::to_string(&record.payload)?,
                timestamp(record.recorded_at),
            ],
        )?;
        Ok(())
    }

    /// Most recent records first, optionally filtered by kind
    pub fn records(&self, kind: Option<&str>, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT kind, tier, payload, recorded_at FROM audit_records
             WHERE (?1 IS NULL OR kind = ?1)
             ORDER BY recorded_at DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![kind, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (kind, tier, payload, recorded_at) = row?;
            let Some(tier) = tier_from_str(&tier) else {
                tracing::warn!(
                    kind = %kind,
                    tier = %tier,
                    "Skipping audit record with unknown tier"
                );
                continue;
            };
            records.push(AuditRecord {
                kind,
                tier,
                payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(records)
    }

    /// Delete records older than their tier's retention
    pub fn purge_expired(&self, now: DateTime<Utc>, policy: &RetentionPolicy) -> Result<usize> {
        let conn = self.lock()?;
        let mut purged = 0;
        for tier in [
            RetentionTier::Session,
            RetentionTier::Analytics,
            RetentionTier::LongTerm,
        ] {
            // a window chrono cannot represent keeps the tier forever
            let Some(cutoff) = chrono::Duration::try_days(policy.days(tier))
                .and_then(|window| now.checked_sub_signed(window))
            else {
                continue;
            };
            purged += conn.execute(
                "DELETE FROM audit_records WHERE tier = ?1 AND recorded_at < ?2",
                params![tier.as_str(), timestamp(cutoff)],
            )?;
        }
        if purged > 0 {
            tracing::info!(purged, "Purged expired audit records");
        }
        Ok(purged)
    }

    // ========================================================================
    // Error signals
    // ========================================================================

    /// Append a raw signal for the detection loop to pick up
    pub fn enqueue_signal(&self, report: &ErrorReport) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO error_signals (component, error_type, message, trace, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                report.component,
                report.error_type,
                report.message,
                report.trace,
                serde_json::to_string(&report.metadata)?,
                timestamp(Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Signals past the watermark, oldest first; advances the watermark and
    /// deletes the rows it handed out
    pub fn take_signals(&self) -> Result<Vec<ErrorReport>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let watermark: i64 = tx
            .query_row(
                "SELECT last_seq FROM signal_watermark WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        let mut last_seq = watermark;
        let mut reports = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT seq, component, error_type, message, trace, metadata
                 FROM error_signals WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![watermark, self.poll_batch as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?;

            for row in rows {
                let (seq, component, error_type, message, trace, metadata) = row?;
                last_seq = seq;
                reports.push(ErrorReport {
                    error_type,
                    message,
                    trace,
                    component,
                    metadata: serde_json::from_str::<Map<String, Value>>(&metadata)
                        .unwrap_or_default(),
                });
            }
        }

        if last_seq != watermark {
            tx.execute(
                "INSERT INTO signal_watermark (id, last_seq) VALUES (1, ?1)
                 ON CONFLICT(id) DO UPDATE SET last_seq = excluded.last_seq",
                params![last_seq],
            )?;
            tx.execute("DELETE FROM error_signals WHERE seq <= ?1", params![last_seq])?;
        }
        tx.commit()?;

        Ok(reports)
    }
}

#[async_trait]
impl AuditSink for SqliteStore {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()> {
        self.insert_record(&record)
    }
}

#[async_trait]
impl SignalSource for SqliteStore {
    async fn poll(&self) -> anyhow::Result<Vec<ErrorReport>> {
        self.take_signals()
    }
}

/// Purge expired audit records every `interval` until shutdown
pub fn spawn_retention(
    store: SqliteStore,
    policy: RetentionPolicy,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = store.purge_expired(Utc::now(), &policy) {
                tracing::error!("Error purging audit records: {:#}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> RetentionPolicy {
        RetentionPolicy {
            session_days: 1,
            analytics_days: 90,
            long_term_days: 365,
        }
    }

    #[tokio::test]
    async fn test_records_round_trip_through_sink() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .record(AuditRecord::new(
                "recovery_attempt",
                RetentionTier::Analytics,
                json!({ "rule_name": "memory_cache_clear", "success": true }),
            ))
            .await
            .unwrap();
        store
            .record(AuditRecord::new("error_event", RetentionTier::Analytics, json!({})))
            .await
            .unwrap();

        let all = store.records(None, 10).unwrap();
        assert_eq!(all.len(), 2);

        let attempts = store.records(Some("recovery_attempt"), 10).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].tier, RetentionTier::Analytics);
        assert_eq!(attempts[0].payload["rule_name"], "memory_cache_clear");
    }

    #[test]
    fn test_purge_respects_tier() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ten_days_ago = Utc::now() - chrono::Duration::days(10);

        for tier in [RetentionTier::Session, RetentionTier::Analytics, RetentionTier::LongTerm] {
            let mut record = AuditRecord::new("old", tier, json!({}));
            record.recorded_at = ten_days_ago;
            store.insert_record(&record).unwrap();
        }

        assert_eq!(store.purge_expired(Utc::now(), &policy()).unwrap(), 1);
        let left: Vec<RetentionTier> = store
            .records(None, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.tier)
            .collect();
        assert_eq!(left.len(), 2);
        assert!(!left.contains(&RetentionTier::Session));
    }

    #[tokio::test]
    async fn test_signals_drain_past_watermark() {
        let store = SqliteStore::open_in_memory().unwrap().with_poll_batch(2);
        for message in ["cache eviction error", "database connection lost", "slow responses"] {
            store
                .enqueue_signal(&ErrorReport::new("svc", "runtime", message))
                .unwrap();
        }

        let first = store.poll().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message, "cache eviction error");

        let second = store.poll().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message, "slow responses");

        assert!(store.poll().await.unwrap().is_empty());
    }

    fn signal_rows(store: &SqliteStore) -> i64 {
        store
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM error_signals", [], |row| row.get(0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_drained_signals_are_deleted() {
        let store = SqliteStore::open_in_memory().unwrap().with_poll_batch(2);
        for message in ["cache eviction error", "database connection lost", "slow responses"] {
            store
                .enqueue_signal(&ErrorReport::new("svc", "runtime", message))
                .unwrap();
        }
        assert_eq!(signal_rows(&store), 3);

        store.poll().await.unwrap();
        assert_eq!(signal_rows(&store), 1);
        store.purge_expired(Utc::now(), &policy()).unwrap();
        assert_eq!(signal_rows(&store), 1);

        store.poll().await.unwrap();
        assert_eq!(signal_rows(&store), 0);

        // sequence numbers keep increasing after the table empties
        store
            .enqueue_signal(&ErrorReport::new("svc", "runtime", "late arrival"))
            .unwrap();
        let late = store.poll().await.unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].message, "late arrival");
    }

    #[test]
    fn test_watermark_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("heal.db");

        let store = SqliteStore::open(&path).unwrap();
        store
            .enqueue_signal(
                &ErrorReport::new("svc", "runtime", "fatal crash")
                    .with_metadata("pid", json!(42)),
            )
            .unwrap();
        let drained = store.take_signals().unwrap();
        assert_eq!(drained[0].metadata["pid"], 42);
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.take_signals().unwrap().is_empty());
    }
}
