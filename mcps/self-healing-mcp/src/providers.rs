//! Status snapshots read from disk
//!
//! Other subsystems (performance monitor, config tuner, MCP discovery)
//! write their latest status as `<dir>/<subsystem>.json`. Each file backs one
//! [`StatusProvider`] for the task generator and the health report.

use anyhow::{Context, Result};
use async_trait::async_trait;
use healing_engine::{StatusProvider, StatusSnapshot};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct JsonDirStatusProvider {
    subsystem: String,
    path: PathBuf,
}

impl JsonDirStatusProvider {
    pub fn new(dir: &Path, subsystem: impl Into<String>) -> Self {
        let subsystem = subsystem.into();
        let path = dir.join(format!("{}.json", subsystem));
        Self { subsystem, path }
    }

    /// One provider per subsystem name
    pub fn for_subsystems(dir: &Path, subsystems: &[String]) -> Vec<Arc<dyn StatusProvider>> {
        subsystems
            .iter()
            .map(|name| Arc::new(Self::new(dir, name.clone())) as Arc<dyn StatusProvider>)
            .collect()
    }
}

#[async_trait]
impl StatusProvider for JsonDirStatusProvider {
    fn subsystem(&self) -> &str {
        &self.subsystem
    }

    async fn snapshot(&self) -> Result<StatusSnapshot> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read status file {}", self.path.display()))?;

        match serde_json::from_str::<Value>(&content)
            .with_context(|| format!("Invalid JSON in {}", self.path.display()))?
        {
            Value::Object(map) => Ok(map),
            _ => anyhow::bail!("{} does not contain a JSON object", self.path.display()),
        }
    }
}
