//! Agent definition loading and validation (C7).
//!
//! An agent definition couples a role, an allowed/forbidden tool set, an
//! output contract, and a system-prompt template. Reviewer agents carry an
//! extra `specialist_type` tag over a closed taxonomy (security /
//! performance / architecture / simplicity), kept here as a plain enum
//! rather than a free-form name so unknown specialists fail loudly at load
//! time.

use crate::errors::AgentError;
use crate::tools::ToolPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistType {
    SecuritySentinel,
    PerformanceOracle,
    ArchitectureStrategist,
    SimplicityReviewer,
}

impl SpecialistType {
    pub fn display_name(self) -> &'static str {
        match self {
            SpecialistType::SecuritySentinel => "Security Sentinel",
            SpecialistType::PerformanceOracle => "Performance Oracle",
            SpecialistType::ArchitectureStrategist => "Architecture Strategist",
            SpecialistType::SimplicityReviewer => "Simplicity Reviewer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    pub role: String,
    pub system_prompt_template: String,
    #[serde(default)]
    pub output_contract: Option<String>,
    #[serde(default)]
    pub specialist_type: Option<SpecialistType>,
    #[serde(default)]
    pub gating: bool,
    #[serde(default)]
    pub tool_policy: ToolPolicy,
}

impl AgentDefinition {
    fn validate(&self, known_contracts: &[&str]) -> Result<(), AgentError> {
        let overlap = self
            .tool_policy
            .allowed_tools
            .iter()
            .find(|t| self.tool_policy.forbidden_tools.contains(t));
        if let Some(tool) = overlap {
            return Err(AgentError::OverlappingToolSets {
                agent: self.name.clone(),
                tool: tool.clone(),
            });
        }
        if let Some(contract) = &self.output_contract {
            if !known_contracts.contains(&contract.as_str()) {
                return Err(AgentError::UnknownOutputContract {
                    agent: self.name.clone(),
                    contract: contract.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn render_system_prompt(&self, vars: &HashMap<String, String>) -> String {
        let mut rendered = self.system_prompt_template.clone();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
        }
        rendered
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent definition, validating it against the set of
    /// contract names already known to the caller (typically the contract
    /// registry's loaded set).
    pub fn register(&mut self, agent: AgentDefinition, known_contracts: &[&str]) -> Result<(), AgentError> {
        agent.validate(known_contracts)?;
        self.agents.insert(agent.name.clone(), agent);
        Ok(())
    }

    pub fn load_dir(&mut self, dir: &Path, known_contracts: &[&str]) -> Result<usize, AgentError> {
        let mut loaded = 0;
        if !dir.exists() {
            return Ok(0);
        }
        for entry in std::fs::read_dir(dir).map_err(|e| AgentError::LoadFailed {
            path: dir.to_path_buf(),
            source: e,
        })? {
            let entry = entry.map_err(|e| AgentError::LoadFailed {
                path: dir.to_path_buf(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| AgentError::LoadFailed {
                path: path.clone(),
                source: e,
            })?;
            let agent: AgentDefinition = serde_yaml::from_str(&content).map_err(|e| AgentError::LoadFailed {
                path: path.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;
            self.register(agent, known_contracts)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn get(&self, name: &str) -> Result<&AgentDefinition, AgentError> {
        self.agents.get(name).ok_or_else(|| AgentError::UnknownAgent(name.to_string()))
    }

    /// Agents tagged with the given orchestration role — e.g. all reviewer
    /// agents for a stage's review loop.
    pub fn by_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a AgentDefinition> {
        self.agents.values().filter(move |a| a.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn implementer() -> AgentDefinition {
        AgentDefinition {
            name: "implementer".into(),
            role: "implement".into(),
            system_prompt_template: "Implement the task: {{goal}}".into(),
            output_contract: Some("code-change".into()),
            specialist_type: None,
            gating: false,
            tool_policy: ToolPolicy {
                allowed_tools: vec!["edit_file".into()],
                ..Default::default()
            },
        }
    }

    #[test]
    fn register_accepts_valid_agent() {
        let mut registry = AgentRegistry::new();
        let result = registry.register(implementer(), &["code-change"]);
        assert!(result.is_ok());
        assert!(registry.get("implementer").is_ok());
    }

    #[test]
    fn register_rejects_overlapping_tool_sets() {
        let mut registry = AgentRegistry::new();
        let mut agent = implementer();
        agent.tool_policy.forbidden_tools.push("edit_file".into());
        let result = registry.register(agent, &["code-change"]);
        assert!(matches!(result, Err(AgentError::OverlappingToolSets { .. })));
    }

    #[test]
    fn register_rejects_unknown_output_contract() {
        let mut registry = AgentRegistry::new();
        let result = registry.register(implementer(), &["other-contract"]);
        assert!(matches!(result, Err(AgentError::UnknownOutputContract { .. })));
    }

    #[test]
    fn get_unknown_agent_errors() {
        let registry = AgentRegistry::new();
        assert!(matches!(registry.get("nope"), Err(AgentError::UnknownAgent(_))));
    }

    #[test]
    fn by_role_filters_correctly() {
        let mut registry = AgentRegistry::new();
        registry.register(implementer(), &["code-change"]).unwrap();
        let mut reviewer = implementer();
        reviewer.name = "security-reviewer".into();
        reviewer.role = "review".into();
        reviewer.specialist_type = Some(SpecialistType::SecuritySentinel);
        reviewer.gating = true;
        registry.register(reviewer, &["code-change"]).unwrap();

        let implementers: Vec<_> = registry.by_role("implement").collect();
        let reviewers: Vec<_> = registry.by_role("review").collect();
        assert_eq!(implementers.len(), 1);
        assert_eq!(reviewers.len(), 1);
        assert_eq!(reviewers[0].specialist_type, Some(SpecialistType::SecuritySentinel));
    }

    #[test]
    fn render_system_prompt_substitutes_vars() {
        let agent = implementer();
        let mut vars = HashMap::new();
        vars.insert("goal".to_string(), "add rate limiting".to_string());
        let rendered = agent.render_system_prompt(&vars);
        assert_eq!(rendered, "Implement the task: add rate limiting");
    }

    #[test]
    fn specialist_type_display_names_are_human_readable() {
        assert_eq!(SpecialistType::SecuritySentinel.display_name(), "Security Sentinel");
        assert_eq!(SpecialistType::SimplicityReviewer.display_name(), "Simplicity Reviewer");
    }
}
