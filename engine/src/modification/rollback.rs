//! Undoing a failed modification

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::types::ModificationTask;

/// Restores the state from before a task ran
#[async_trait]
pub trait RollbackHandler: Send + Sync {
    async fn rollback(&self, task: &ModificationTask) -> anyhow::Result<()>;
}

/// Records the rollback and does nothing else
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggedRollback;

#[async_trait]
impl RollbackHandler for LoggedRollback {
    async fn rollback(&self, task: &ModificationTask) -> anyhow::Result<()> {
        tracing::warn!(
            task_id = %task.id,
            plan = %task.rollback_plan,
            "Rolling back modifications"
        );
        Ok(())
    }
}

/// Restores target files from `HEAD` with `git checkout`
#[derive(Debug, Clone)]
pub struct GitRollback {
    repo_dir: PathBuf,
    timeout: Duration,
}

impl GitRollback {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl RollbackHandler for GitRollback {
    async fn rollback(&self, task: &ModificationTask) -> anyhow::Result<()> {
        if task.target_files.is_empty() {
            return Ok(());
        }

        tracing::warn!(
            task_id = %task.id,
            files = task.target_files.len(),
            "Restoring target files from HEAD"
        );

        let mut cmd = Command::new("git");
        cmd.args(["checkout", "HEAD", "--"])
            .args(&task.target_files)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("git checkout timed out after {:?}", self.timeout))??;

        if !output.status.success() {
            anyhow::bail!(
                "git checkout failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modification::types::{ModificationScope, ModificationType};
    use chrono::Utc;

    fn task(files: &[&str]) -> ModificationTask {
        ModificationTask::new(ModificationType::BugFix, ModificationScope::Module, "t", Utc::now())
            .with_targets(files.iter().copied())
    }

    #[tokio::test]
    async fn test_git_rollback_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let rollback = GitRollback::new(dir.path());
        assert!(rollback.rollback(&task(&["src/lib.rs"])).await.is_err());
    }

    #[tokio::test]
    async fn test_git_rollback_without_targets_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let rollback = GitRollback::new(dir.path().join("does-not-exist"));
        assert!(rollback.rollback(&task(&[])).await.is_ok());
    }
}
