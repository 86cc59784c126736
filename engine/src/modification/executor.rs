//! Task executors
//!
//! The scheduler only sees [`TaskExecutor`]. Two implementations ship here:
//! a round-robin team of [`Collaborator`]s and a randomized simulation used
//! when no team is wired up.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::team::ExecutorTeam;
use super::types::ModificationTask;

/// Carries out a modification task; `Ok(false)` and `Err(_)` are failures
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Number of agents behind this executor
    fn agent_count(&self) -> usize {
        0
    }

    async fn execute(&self, task: &ModificationTask) -> anyhow::Result<bool>;
}

/// One message in a team conversation
#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: String,
    pub content: String,
}

/// What a collaborator decided on its turn
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// Keep going; the message is appended to the transcript
    Continue(String),
    /// The work is finished and meets the success criteria
    Done,
    /// The work cannot be completed
    Failed(String),
}

/// A member of a collaborative team
#[async_trait]
pub trait Collaborator: Send + Sync {
    fn name(&self) -> &str;

    async fn take_turn(
        &self,
        brief: &str,
        transcript: &[Turn],
    ) -> anyhow::Result<TurnOutcome>;
}

/// Text handed to a team describing the task
pub fn task_brief(task: &ModificationTask) -> String {
    format!(
        "Task: {}\nType: {}\nScope: {}\nTarget Files: {}\nSuccess Criteria: {}\n\n\
         Analyze the current system state and implement the necessary modifications. \
         Ensure all changes are tested and documented.",
        task.description,
        task.task_type.as_str(),
        task.scope.as_str(),
        task.target_files.join(", "),
        task.success_criteria.join(", "),
    )
}

/// Routes each task to its team and lets members take turns
pub struct CollaborativeExecutor {
    teams: HashMap<ExecutorTeam, Vec<Arc<dyn Collaborator>>>,
    max_turns: usize,
    fallback: Arc<dyn TaskExecutor>,
}

impl CollaborativeExecutor {
    pub fn new(max_turns: usize, fallback: Arc<dyn TaskExecutor>) -> Self {
        Self {
            teams: HashMap::new(),
            max_turns,
            fallback,
        }
    }

    pub fn with_team(mut self, team: ExecutorTeam, members: Vec<Arc<dyn Collaborator>>) -> Self {
        self.teams.insert(team, members);
        self
    }
}

#[async_trait]
impl TaskExecutor for CollaborativeExecutor {
    fn name(&self) -> &str {
        "collaborative"
    }

    fn agent_count(&self) -> usize {
        let mut names: Vec<&str> = self
            .teams
            .values()
            .flatten()
            .map(|member| member.name())
            .collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    async fn execute(&self, task: &ModificationTask) -> anyhow::Result<bool> {
        let team = ExecutorTeam::for_task(task.task_type);
        let members = match self.teams.get(&team) {
            Some(members) if !members.is_empty() => members,
            _ => {
                tracing::debug!(
                    team = team.as_str(),
                    task_id = %task.id,
                    "No team members, using fallback executor"
                );
                return self.fallback.execute(task).await;
            }
        };

        let brief = task_brief(task);
        let mut transcript: Vec<Turn> = Vec::new();

        for turn in 0..self.max_turns {
            let member = &members[turn % members.len()];
            match member.take_turn(&brief, &transcript).await? {
                TurnOutcome::Continue(content) => transcript.push(Turn {
                    speaker: member.name().to_string(),
                    content,
                }),
                TurnOutcome::Done => {
                    tracing::info!(
                        task_id = %task.id,
                        agent = member.name(),
                        turns = turn + 1,
                        "Team finished task"
                    );
                    return Ok(true);
                }
                TurnOutcome::Failed(reason) => {
                    tracing::warn!(
                        task_id = %task.id,
                        agent = member.name(),
                        "Team gave up: {}",
                        reason
                    );
                    return Ok(false);
                }
            }
        }

        tracing::warn!(task_id = %task.id, max_turns = self.max_turns, "Team ran out of turns");
        Ok(false)
    }
}

/// Sleeps, then succeeds with a probability that falls with complexity
pub struct SimulatedExecutor {
    delay: Duration,
    rng: Mutex<StdRng>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_secs(2),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic outcomes for a given seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            delay: Duration::from_secs(2),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn success_probability(complexity: u8) -> f64 {
        (1.0 - f64::from(complexity) / 15.0).max(0.3)
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulation"
    }

    async fn execute(&self, task: &ModificationTask) -> anyhow::Result<bool> {
        tracing::info!(task_id = %task.id, "Executing task in simulation mode");
        tokio::time::sleep(self.delay).await;

        let roll: f64 = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| anyhow::anyhow!("simulation rng lock poisoned"))?;
            rng.gen()
        };
        Ok(roll < Self::success_probability(task.estimated_complexity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modification::types::{ModificationScope, ModificationType};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        finish_after: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Collaborator for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn take_turn(
            &self,
            _brief: &str,
            transcript: &[Turn],
        ) -> anyhow::Result<TurnOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if transcript.len() >= self.finish_after {
                Ok(TurnOutcome::Done)
            } else {
                Ok(TurnOutcome::Continue(format!("{} reviewed", self.name)))
            }
        }
    }

    struct Never;

    #[async_trait]
    impl TaskExecutor for Never {
        fn name(&self) -> &str {
            "never"
        }

        async fn execute(&self, _task: &ModificationTask) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    fn task(task_type: ModificationType) -> ModificationTask {
        ModificationTask::new(task_type, ModificationScope::Module, "test", Utc::now())
            .with_targets(["src/lib.rs"])
    }

    #[test]
    fn test_success_probability_floor() {
        assert!((SimulatedExecutor::success_probability(3) - 0.8).abs() < 1e-9);
        assert!((SimulatedExecutor::success_probability(10) - (1.0 - 10.0 / 15.0)).abs() < 1e-9);
        assert_eq!(SimulatedExecutor::success_probability(12), 0.3);
    }

    #[tokio::test]
    async fn test_seeded_simulation_is_repeatable() {
        let a = SimulatedExecutor::seeded(7).with_delay(Duration::ZERO);
        let b = SimulatedExecutor::seeded(7).with_delay(Duration::ZERO);
        let t = task(ModificationType::BugFix);

        for _ in 0..5 {
            assert_eq!(a.execute(&t).await.unwrap(), b.execute(&t).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_team_round_robin_until_done() {
        let calls = Arc::new(AtomicUsize::new(0));
        let debugger: Arc<dyn Collaborator> = Arc::new(Scripted {
            name: "debugger",
            finish_after: 3,
            calls: calls.clone(),
        });
        let security: Arc<dyn Collaborator> = Arc::new(Scripted {
            name: "security_specialist",
            finish_after: 3,
            calls: calls.clone(),
        });

        let executor = CollaborativeExecutor::new(10, Arc::new(Never))
            .with_team(ExecutorTeam::Debugging, vec![debugger, security]);

        assert_eq!(executor.agent_count(), 2);
        assert!(executor.execute(&task(ModificationType::BugFix)).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_team_fails_when_turns_run_out() {
        let calls = Arc::new(AtomicUsize::new(0));
        let member: Arc<dyn Collaborator> = Arc::new(Scripted {
            name: "configurator",
            finish_after: 100,
            calls: calls.clone(),
        });
        let executor = CollaborativeExecutor::new(3, Arc::new(Never))
            .with_team(ExecutorTeam::Configuration, vec![member]);

        assert!(!executor
            .execute(&task(ModificationType::ConfigurationTuning))
            .await
            .unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_team_uses_fallback() {
        let executor = CollaborativeExecutor::new(10, Arc::new(Never));
        assert!(!executor.execute(&task(ModificationType::BugFix)).await.unwrap());
        assert_eq!(executor.agent_count(), 0);
    }
}
