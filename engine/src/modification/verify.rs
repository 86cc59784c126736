//! Post-execution verification

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::types::ModificationTask;

/// Check name -> passed
pub type TestResults = BTreeMap<String, bool>;

/// Check name reported when the checks could not be run at all
pub const GENERAL_CHECK: &str = "general_test";

/// Runs checks for a finished task
#[async_trait]
pub trait VerificationRunner: Send + Sync {
    async fn verify(&self, task: &ModificationTask) -> anyhow::Result<TestResults>;
}

/// An empty result set passes
pub fn all_passed(results: &TestResults) -> bool {
    results.values().all(|passed| *passed)
}

/// Runs no checks
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChecks;

#[async_trait]
impl VerificationRunner for NoChecks {
    async fn verify(&self, _task: &ModificationTask) -> anyhow::Result<TestResults> {
        Ok(TestResults::new())
    }
}

/// Runs a command per target file; `{file}` in the arguments is replaced
/// with the file path. Files whose path contains `test` are skipped.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    check_timeout: Duration,
}

impl CommandVerifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            check_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    async fn run_check(&self, file: &str) -> anyhow::Result<bool> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|arg| arg.replace("{file}", file)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(self.check_timeout, cmd.output())
            .await
            .map_err(|_| anyhow::anyhow!("check for {} timed out", file))??;

        if !output.status.success() {
            tracing::debug!(
                file,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Verification check failed"
            );
        }
        Ok(output.status.success())
    }
}

#[async_trait]
impl VerificationRunner for CommandVerifier {
    async fn verify(&self, task: &ModificationTask) -> anyhow::Result<TestResults> {
        let mut results = TestResults::new();

        for file in task.target_files.iter().filter(|f| !f.contains("test")) {
            match self.run_check(file).await {
                Ok(passed) => {
                    results.insert(file.clone(), passed);
                }
                Err(e) => {
                    tracing::error!(task_id = %task.id, "Error running verification: {}", e);
                    return Ok(TestResults::from([(GENERAL_CHECK.to_string(), false)]));
                }
            }
        }

        Ok(results)
    }
}
