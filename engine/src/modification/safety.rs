//! Pre-admission safety checks

use async_trait::async_trait;
use std::fmt;
use sysinfo::System;
use tokio::sync::Mutex;

use super::types::ModificationTask;
use crate::config::ModificationConfig;

/// Host resource usage at one point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostLoad {
    pub cpu_percent: f32,
    pub memory_percent: f64,
}

/// Samples host resource usage
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn sample(&self) -> anyhow::Result<HostLoad>;
}

/// [`ResourceProbe`] backed by `sysinfo`
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProbe for SysinfoProbe {
    async fn sample(&self) -> anyhow::Result<HostLoad> {
        let mut sys = self.system.lock().await;
        sys.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let total = sys.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            sys.used_memory() as f64 / total as f64 * 100.0
        };

        Ok(HostLoad {
            cpu_percent: sys.global_cpu_usage(),
            memory_percent,
        })
    }
}

/// Why a task was stopped before execution
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyBlock {
    ResourcePressure { cpu_percent: f32, memory_percent: f64 },
    EmergencyMode,
    FileConflict { existing_task_id: String, file: String },
}

impl fmt::Display for SafetyBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyBlock::ResourcePressure {
                cpu_percent,
                memory_percent,
            } => write!(
                f,
                "system resources too high (cpu {:.1}%, memory {:.1}%)",
                cpu_percent, memory_percent
            ),
            SafetyBlock::EmergencyMode => write!(f, "emergency mode active"),
            SafetyBlock::FileConflict {
                existing_task_id,
                file,
            } => write!(f, "file conflict on {} with active task {}", file, existing_task_id),
        }
    }
}

/// Run the admission checks for `task` against the currently active tasks.
///
/// `load` is `None` when the probe could not be sampled; the resource check
/// is then skipped.
pub fn check<'a>(
    task: &ModificationTask,
    active: impl IntoIterator<Item = &'a ModificationTask>,
    load: Option<HostLoad>,
    emergency_mode: bool,
    config: &ModificationConfig,
) -> Result<(), SafetyBlock> {
    if let Some(load) = load {
        if load.cpu_percent > config.max_cpu_percent
            || load.memory_percent > config.max_memory_percent
        {
            return Err(SafetyBlock::ResourcePressure {
                cpu_percent: load.cpu_percent,
                memory_percent: load.memory_percent,
            });
        }
    }

    if emergency_mode {
        return Err(SafetyBlock::EmergencyMode);
    }

    for other in active {
        if std::ptr::eq(other, task) {
            continue;
        }
        if let Some(file) = task.shared_target(other) {
            return Err(SafetyBlock::FileConflict {
                existing_task_id: other.id.clone(),
                file: file.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modification::types::{ModificationScope, ModificationType};
    use chrono::Utc;

    fn task(id: &str, files: &[&str]) -> ModificationTask {
        let mut task = ModificationTask::new(
            ModificationType::BugFix,
            ModificationScope::Module,
            "t",
            Utc::now(),
        )
        .with_targets(files.iter().copied());
        task.id = id.to_string();
        task
    }

    fn none() -> Vec<&'static ModificationTask> {
        Vec::new()
    }

    const CALM: HostLoad = HostLoad {
        cpu_percent: 10.0,
        memory_percent: 40.0,
    };

    #[test]
    fn test_passes_when_calm() {
        let config = ModificationConfig::default();
        let t = task("a", &["src/a.rs"]);
        assert_eq!(check(&t, [&t], Some(CALM), false, &config), Ok(()));
        assert_eq!(check(&t, none(), None, false, &config), Ok(()));
    }

    #[test]
    fn test_resource_pressure_blocks() {
        let config = ModificationConfig::default();
        let t = task("a", &["src/a.rs"]);
        let hot_cpu = HostLoad { cpu_percent: 95.0, memory_percent: 10.0 };
        let full_memory = HostLoad { cpu_percent: 10.0, memory_percent: 96.0 };
        assert!(matches!(
            check(&t, none(), Some(hot_cpu), false, &config),
            Err(SafetyBlock::ResourcePressure { .. })
        ));
        assert!(matches!(
            check(&t, none(), Some(full_memory), false, &config),
            Err(SafetyBlock::ResourcePressure { .. })
        ));
    }

    #[test]
    fn test_emergency_and_conflict() {
        let config = ModificationConfig::default();
        let t = task("a", &["src/a.rs", "src/shared.rs"]);
        let other = task("b", &["src/shared.rs"]);

        assert_eq!(
            check(&t, none(), Some(CALM), true, &config),
            Err(SafetyBlock::EmergencyMode)
        );
        assert_eq!(
            check(&t, [&other], Some(CALM), false, &config),
            Err(SafetyBlock::FileConflict {
                existing_task_id: "b".to_string(),
                file: "src/shared.rs".to_string(),
            })
        );
    }
}
