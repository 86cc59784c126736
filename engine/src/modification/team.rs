//! Executor teams and the agent capability catalogue

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::ModificationType;

/// Team a task is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorTeam {
    Architecture,
    Performance,
    Debugging,
    Configuration,
}

impl ExecutorTeam {
    /// Fixed routing from task type to team
    pub fn for_task(task_type: ModificationType) -> Self {
        match task_type {
            ModificationType::ArchitectureRefinement | ModificationType::NewFeatureAddition => {
                ExecutorTeam::Architecture
            }
            ModificationType::PerformanceEnhancement | ModificationType::CodeOptimization => {
                ExecutorTeam::Performance
            }
            ModificationType::BugFix => ExecutorTeam::Debugging,
            ModificationType::ConfigurationTuning => ExecutorTeam::Configuration,
            _ => ExecutorTeam::Architecture,
        }
    }

    /// Capability keys of the team members, in speaking order
    pub fn members(&self) -> &'static [&'static str] {
        match self {
            ExecutorTeam::Architecture => &["architect", "optimizer", "security_specialist"],
            ExecutorTeam::Performance => &["optimizer", "architect"],
            ExecutorTeam::Debugging => &["debugger", "security_specialist"],
            ExecutorTeam::Configuration => &["configurator", "optimizer"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorTeam::Architecture => "architecture",
            ExecutorTeam::Performance => "performance",
            ExecutorTeam::Debugging => "debugging",
            ExecutorTeam::Configuration => "configuration",
        }
    }
}

/// What one kind of agent can work on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapability {
    pub name: String,
    pub description: String,
    pub specializations: Vec<String>,
    pub max_complexity: u8,
    pub supported_modifications: Vec<ModificationType>,
    pub required_tools: Vec<String>,
}

impl AgentCapability {
    fn new(
        name: &str,
        description: &str,
        specializations: &[&str],
        max_complexity: u8,
        supported_modifications: &[ModificationType],
        required_tools: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            specializations: specializations.iter().map(|s| s.to_string()).collect(),
            max_complexity,
            supported_modifications: supported_modifications.to_vec(),
            required_tools: required_tools.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn supports(&self, task_type: ModificationType, complexity: u8) -> bool {
        complexity <= self.max_complexity && self.supported_modifications.contains(&task_type)
    }
}

/// The built-in capability catalogue, keyed by agent
pub fn agent_capabilities() -> BTreeMap<String, AgentCapability> {
    use ModificationType as T;

    let catalogue = [
        (
            "architect",
            AgentCapability::new(
                "System Architect",
                "Designs system architecture and high-level improvements",
                &["architecture", "design_patterns", "system_integration"],
                10,
                &[T::ArchitectureRefinement, T::NewFeatureAddition, T::IntegrationAddition],
                &["code_analysis", "documentation_review", "system_mapping"],
            ),
        ),
        (
            "optimizer",
            AgentCapability::new(
                "Performance Optimizer",
                "Optimizes code and system performance",
                &["performance", "algorithms", "caching", "database_optimization"],
                8,
                &[T::PerformanceEnhancement, T::CodeOptimization],
                &["profiling", "benchmarking", "code_analysis"],
            ),
        ),
        (
            "debugger",
            AgentCapability::new(
                "Bug Hunter",
                "Identifies and fixes bugs and issues",
                &["debugging", "error_analysis", "testing", "quality_assurance"],
                7,
                &[T::BugFix, T::SecurityImprovement],
                &["error_analysis", "testing_framework", "code_review"],
            ),
        ),
        (
            "configurator",
            AgentCapability::new(
                "Configuration Specialist",
                "Optimizes configuration and settings",
                &["configuration", "environment_setup", "deployment"],
                6,
                &[T::ConfigurationTuning],
                &["config_analysis", "environment_testing"],
            ),
        ),
        (
            "security_specialist",
            AgentCapability::new(
                "Security Specialist",
                "Enhances system security and identifies vulnerabilities",
                &["security", "authentication", "encryption", "vulnerability_assessment"],
                9,
                &[T::SecurityImprovement],
                &["security_scanner", "penetration_testing", "code_audit"],
            ),
        ),
    ];

    catalogue
        .into_iter()
        .map(|(key, capability)| (key.to_string(), capability))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_routing() {
        use ModificationType as T;
        assert_eq!(ExecutorTeam::for_task(T::ArchitectureRefinement), ExecutorTeam::Architecture);
        assert_eq!(ExecutorTeam::for_task(T::NewFeatureAddition), ExecutorTeam::Architecture);
        assert_eq!(ExecutorTeam::for_task(T::CodeOptimization), ExecutorTeam::Performance);
        assert_eq!(ExecutorTeam::for_task(T::PerformanceEnhancement), ExecutorTeam::Performance);
        assert_eq!(ExecutorTeam::for_task(T::BugFix), ExecutorTeam::Debugging);
        assert_eq!(ExecutorTeam::for_task(T::ConfigurationTuning), ExecutorTeam::Configuration);
        assert_eq!(ExecutorTeam::for_task(T::SecurityImprovement), ExecutorTeam::Architecture);
        assert_eq!(ExecutorTeam::for_task(T::IntegrationAddition), ExecutorTeam::Architecture);
    }

    #[test]
    fn test_team_members_exist_in_catalogue() {
        let catalogue = agent_capabilities();
        assert_eq!(catalogue.len(), 5);
        for team in [
            ExecutorTeam::Architecture,
            ExecutorTeam::Performance,
            ExecutorTeam::Debugging,
            ExecutorTeam::Configuration,
        ] {
            for member in team.members() {
                assert!(catalogue.contains_key(*member), "missing {member}");
            }
        }
    }

    #[test]
    fn test_capability_support() {
        let catalogue = agent_capabilities();
        let configurator = &catalogue["configurator"];
        assert!(configurator.supports(ModificationType::ConfigurationTuning, 6));
        assert!(!configurator.supports(ModificationType::ConfigurationTuning, 7));
        assert!(!configurator.supports(ModificationType::BugFix, 1));
    }
}
