//! Configuration loading for self-healing-mcp
//!
//! Configuration is loaded from:
//! 1. Environment variable SELF_HEALING_CONFIG
//! 2. ~/.binks/self-healing.toml
//! 3. Default values
//!
//! DATABASE_PATH and INBOX_PATH override the file values.

use anyhow::{Context, Result};
use healing_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Engine settings (`[recovery]`, `[modification]`, `[loops]`, `[generator]`)
    #[serde(flatten)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SQLite storage for audit records and queued error signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Retention per tier, in days
    #[serde(default = "default_session_retention_days")]
    pub session_retention_days: i64,
    #[serde(default = "default_analytics_retention_days")]
    pub analytics_retention_days: i64,
    #[serde(default = "default_long_term_retention_days")]
    pub long_term_retention_days: i64,
    /// Maximum signals handed to the detection loop per poll
    #[serde(default = "default_poll_batch")]
    pub poll_batch: usize,
}

/// Markdown inbox notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_inbox_path")]
    pub inbox_path: String,
}

/// Post-execution checks; no command means every task passes verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Program and arguments, `{file}` is replaced by each target file
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_verification_timeout_secs")]
    pub timeout_secs: u64,
}

/// Where failed tasks are rolled back; no repository means log-only rollback
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackConfig {
    #[serde(default)]
    pub git_repository: Option<String>,
}

/// JSON snapshots written by other subsystems, one file per subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_status_subsystems")]
    pub subsystems: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level for this server and the engines when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_database_path() -> String {
    "~/.binks/self-healing.db".to_string()
}

fn default_session_retention_days() -> i64 {
    1
}

fn default_analytics_retention_days() -> i64 {
    90
}

fn default_long_term_retention_days() -> i64 {
    365
}

fn default_poll_batch() -> usize {
    100
}

fn default_inbox_path() -> String {
    "~/.notes/inbox".to_string()
}

fn default_verification_timeout_secs() -> u64 {
    300
}

fn default_status_subsystems() -> Vec<String> {
    vec![
        "performance".to_string(),
        "configuration".to_string(),
        "mcp_discovery".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            session_retention_days: default_session_retention_days(),
            analytics_retention_days: default_analytics_retention_days(),
            long_term_retention_days: default_long_term_retention_days(),
            poll_batch: default_poll_batch(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            inbox_path: default_inbox_path(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            working_dir: None,
            timeout_secs: default_verification_timeout_secs(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            directory: None,
            subsystems: default_status_subsystems(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl VerificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Expand a leading `~` and environment variables in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

impl ServerConfig {
    /// Load configuration from file or use defaults, then apply env overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from: {}", path.display());
                Self::load_from_path(&path)?
            }
            Some(_) => {
                tracing::info!("Config file not found, using defaults");
                Self::default()
            }
            None => {
                tracing::info!("No config path specified, using defaults");
                Self::default()
            }
        };

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.storage.database_path = path;
        }
        if let Ok(path) = std::env::var("INBOX_PATH") {
            config.notifications.inbox_path = path;
        }

        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse self-healing config")?;
        config.engine.validate()?;

        let storage = &config.storage;
        for (key, days) in [
            ("session_retention_days", storage.session_retention_days),
            ("analytics_retention_days", storage.analytics_retention_days),
            ("long_term_retention_days", storage.long_term_retention_days),
        ] {
            if days < 0 || chrono::Duration::try_days(days).is_none() {
                anyhow::bail!("storage.{} out of range: {}", key, days);
            }
        }
        Ok(config)
    }

    /// Find the configuration file path
    fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SELF_HEALING_CONFIG") {
            return Some(expand_path(&path));
        }

        dirs::home_dir().map(|home| home.join(".binks").join("self-healing.toml"))
    }

    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.storage.database_path)
    }

    pub fn inbox_path(&self) -> PathBuf {
        expand_path(&self.notifications.inbox_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.engine.recovery.max_concurrent_recoveries, 3);
        assert_eq!(config.storage.analytics_retention_days, 90);
        assert!(config.notifications.enabled);
        assert!(config.verification.command.is_empty());
        assert!(config.rollback.git_repository.is_none());
        assert_eq!(config.status.subsystems.len(), 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_engine_sections_are_flattened() {
        let toml = r#"
            [recovery]
            max_concurrent_recoveries = 1

            [loops]
            detection_interval_secs = 5

            [storage]
            database_path = "/tmp/heal.db"

            [verification]
            command = ["cargo", "test", "--", "{file}"]
            timeout_secs = 60

            [rollback]
            git_repository = "/srv/app"
        "#;

        let config = ServerConfig::from_toml(toml).unwrap();
        assert_eq!(config.engine.recovery.max_concurrent_recoveries, 1);
        assert_eq!(config.engine.loops.detection_interval_secs, 5);
        assert_eq!(config.engine.loops.detection_backoff_secs, 60);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/heal.db"));
        assert_eq!(config.verification.command[0], "cargo");
        assert_eq!(config.verification.timeout(), Duration::from_secs(60));
        assert_eq!(config.rollback.git_repository.as_deref(), Some("/srv/app"));
    }

    #[test]
    fn test_out_of_range_retention_is_rejected() {
        let err = ServerConfig::from_toml("[storage]\nanalytics_retention_days = -3").unwrap_err();
        assert!(err.to_string().contains("analytics_retention_days"));

        let huge = "[recovery]\nerror_retention_days = 9223372036854775807";
        assert!(ServerConfig::from_toml(huge).is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        let expanded = expand_path("~/.binks/self-healing.db");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with(".binks/self-healing.db"));
    }
}
