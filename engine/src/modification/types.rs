//! Modification task model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::team::ExecutorTeam;

/// Suffix that keeps ids unique when tasks share a millisecond
static TASK_SEQ: AtomicU64 = AtomicU64::new(1);

/// Kind of change a task makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationType {
    CodeOptimization,
    ConfigurationTuning,
    NewFeatureAddition,
    BugFix,
    PerformanceEnhancement,
    SecurityImprovement,
    ArchitectureRefinement,
    IntegrationAddition,
}

impl ModificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationType::CodeOptimization => "code_optimization",
            ModificationType::ConfigurationTuning => "configuration_tuning",
            ModificationType::NewFeatureAddition => "new_feature_addition",
            ModificationType::BugFix => "bug_fix",
            ModificationType::PerformanceEnhancement => "performance_enhancement",
            ModificationType::SecurityImprovement => "security_improvement",
            ModificationType::ArchitectureRefinement => "architecture_refinement",
            ModificationType::IntegrationAddition => "integration_addition",
        }
    }

    /// Prefix used when building task ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ModificationType::CodeOptimization => "codeopt",
            ModificationType::ConfigurationTuning => "config",
            ModificationType::NewFeatureAddition => "feature",
            ModificationType::BugFix => "error",
            ModificationType::PerformanceEnhancement => "perf",
            ModificationType::SecurityImprovement => "security",
            ModificationType::ArchitectureRefinement => "arch",
            ModificationType::IntegrationAddition => "mcp",
        }
    }
}

impl fmt::Display for ModificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a change reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationScope {
    SingleFile,
    Module,
    Subsystem,
    SystemWide,
}

impl ModificationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationScope::SingleFile => "single_file",
            ModificationScope::Module => "module",
            ModificationScope::Subsystem => "subsystem",
            ModificationScope::SystemWide => "system_wide",
        }
    }
}

/// Task lifecycle: pending -> in_progress -> completed | failed -> rolled_back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::RolledBack => "rolled_back",
        }
    }

    /// Pending or in progress
    pub fn is_open(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

/// A proposed change to the running system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationTask {
    pub id: String,
    pub task_type: ModificationType,
    pub scope: ModificationScope,
    pub description: String,
    /// 1 (highest) to 10 (lowest)
    pub priority: u8,
    /// 1 (simple) to 10 (complex)
    pub estimated_complexity: u8,
    pub target_files: Vec<String>,
    pub success_criteria: Vec<String>,
    pub rollback_plan: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_team: Option<ExecutorTeam>,
    pub estimated_duration_secs: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_duration_secs: Option<f64>,
    #[serde(default)]
    pub test_results: BTreeMap<String, bool>,
}

impl ModificationTask {
    pub fn new(
        task_type: ModificationType,
        scope: ModificationScope,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!(
                "{}_{}_{}",
                task_type.id_prefix(),
                now.timestamp_millis(),
                TASK_SEQ.fetch_add(1, Ordering::Relaxed)
            ),
            task_type,
            scope,
            description: description.into(),
            priority: 5,
            estimated_complexity: 5,
            target_files: Vec::new(),
            success_criteria: Vec::new(),
            rollback_plan: String::new(),
            metadata: Map::new(),
            created_at: now,
            status: TaskStatus::Pending,
            assigned_team: None,
            estimated_duration_secs: 3600,
            started_at: None,
            actual_duration_secs: None,
            test_results: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.estimated_complexity = complexity.clamp(1, 10);
        self
    }

    pub fn with_targets<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.success_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rollback_plan(mut self, plan: impl Into<String>) -> Self {
        self.rollback_plan = plan.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Same type and scope
    pub fn same_kind(&self, other: &ModificationTask) -> bool {
        self.task_type == other.task_type && self.scope == other.scope
    }

    /// First target file this task shares with `other`
    pub fn shared_target<'a>(&'a self, other: &ModificationTask) -> Option<&'a str> {
        self.target_files
            .iter()
            .find(|file| other.target_files.contains(file))
            .map(String::as_str)
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            task_type: self.task_type,
            status: self.status,
            priority: self.priority,
            created_at: self.created_at,
        }
    }
}

/// Short form of a task for status payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: ModificationType,
    pub status: TaskStatus,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_clamps_ranges() {
        let task = ModificationTask::new(
            ModificationType::BugFix,
            ModificationScope::Module,
            "fix",
            Utc::now(),
        )
        .with_priority(0)
        .with_complexity(42);

        assert_eq!(task.priority, 1);
        assert_eq!(task.estimated_complexity, 10);
        assert!(task.id.starts_with("error_"));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_shared_target() {
        let now = Utc::now();
        let optimization = ModificationType::CodeOptimization;
        let a = ModificationTask::new(ModificationType::BugFix, ModificationScope::Module, "a", now)
            .with_targets(["src/a.rs", "src/b.rs"]);
        let b = ModificationTask::new(optimization, ModificationScope::Module, "b", now)
            .with_targets(["src/b.rs"]);
        let c = ModificationTask::new(optimization, ModificationScope::Module, "c", now)
            .with_targets(["src/c.rs"]);

        assert_eq!(a.shared_target(&b), Some("src/b.rs"));
        assert_eq!(a.shared_target(&c), None);
        assert!(!a.same_kind(&b));
        assert!(b.same_kind(&c));
    }

    #[test]
    fn test_ids_unique_within_one_millisecond() {
        let now = Utc::now();
        let bug = ModificationType::BugFix;
        let a = ModificationTask::new(bug, ModificationScope::Module, "a", now);
        let b = ModificationTask::new(bug, ModificationScope::SingleFile, "b", now);

        assert_ne!(a.id, b.id);
        assert!(b.id.starts_with(&format!("error_{}_", now.timestamp_millis())));
    }

    #[test]
    fn test_open_statuses() {
        assert!(TaskStatus::Pending.is_open());
        assert!(TaskStatus::InProgress.is_open());
        assert!(!TaskStatus::Completed.is_open());
        assert!(!TaskStatus::RolledBack.is_open());
    }
}
