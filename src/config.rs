//! Runtime configuration: state-store root, LLM backend selection, and the
//! directories agent/contract/pipeline-template definitions load from.
//!
//! Resolved entirely from environment variables so the CLI never needs a
//! config file of its own — `AGENTFORGE_ROOT`, `AGENTFORGE_LLM_MODE`,
//! `AGENTFORGE_LLM_SCRIPT`, `AGENTFORGE_LLM_RECORDING`, `AGENTFORGE_LLM_COMMAND`,
//! `AGENTFORGE_LLM_ARGS`.

use crate::agents::AgentRegistry;
use crate::contracts::{Contract, ContractRegistry, FieldSpec, FieldType, RuleKind, SchemaShape, SemanticRule};
use crate::errors::{AgentError, ContractError};
use crate::llm::{LlmClient, LlmResponse, PlaybackLlmClient, RealLlmClient, RecordingLlmClient, SimulatedLlmClient};
use crate::pipeline::{PipelineTemplate, StageDef};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AGENTFORGE_LLM_MODE '{0}' is not one of real|simulated|record|playback")]
    UnknownLlmMode(String),

    #[error("{mode} mode requires {var} to be set")]
    MissingEnvVar { mode: &'static str, var: &'static str },

    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as a scripted response list: {source}")]
    MalformedScript {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse pipeline template {path}: {source}")]
    MalformedTemplate {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no pipeline template named '{0}' found and no built-in default applies")]
    UnknownTemplate(String),

    #[error(transparent)]
    Llm(#[from] crate::errors::LlmError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

enum LlmMode {
    Real,
    Simulated,
    Record,
    Playback,
}

impl LlmMode {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "real" => Ok(LlmMode::Real),
            "simulated" => Ok(LlmMode::Simulated),
            "record" => Ok(LlmMode::Record),
            "playback" => Ok(LlmMode::Playback),
            other => Err(ConfigError::UnknownLlmMode(other.to_string())),
        }
    }
}

pub struct Config {
    pub root: PathBuf,
    pub agents_dir: PathBuf,
    pub contracts_dir: PathBuf,
    pub templates_dir: PathBuf,
    mode: LlmMode,
    llm_command: String,
    llm_args: Vec<String>,
    llm_script: Option<PathBuf>,
    llm_recording: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = std::env::var("AGENTFORGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".agentforge"));
        let mode_raw = std::env::var("AGENTFORGE_LLM_MODE").unwrap_or_else(|_| "simulated".to_string());
        let mode = LlmMode::parse(&mode_raw)?;
        let llm_command = std::env::var("AGENTFORGE_LLM_COMMAND").unwrap_or_else(|_| "claude".to_string());
        let llm_args = std::env::var("AGENTFORGE_LLM_ARGS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let llm_script = std::env::var("AGENTFORGE_LLM_SCRIPT").ok().map(PathBuf::from);
        let llm_recording = std::env::var("AGENTFORGE_LLM_RECORDING").ok().map(PathBuf::from);

        Ok(Self {
            agents_dir: root.join("agents"),
            contracts_dir: root.join("contracts"),
            templates_dir: root.join("templates"),
            root,
            mode,
            llm_command,
            llm_args,
            llm_script,
            llm_recording,
        })
    }

    pub fn tasks_root(&self) -> PathBuf {
        self.root.join("tasks")
    }

    pub fn audit_dir(&self, task_id: &str) -> PathBuf {
        self.tasks_root().join(task_id).join("audit")
    }

    /// Build the LLM client selected by `AGENTFORGE_LLM_MODE`. `working_dir`
    /// is the project tree a real-mode subprocess is spawned in.
    pub fn build_llm_client(&self, working_dir: PathBuf) -> Result<Box<dyn LlmClient>, ConfigError> {
        match self.mode {
            LlmMode::Real => Ok(Box::new(RealLlmClient::new(
                self.llm_command.clone(),
                self.llm_args.clone(),
                working_dir,
            ))),
            LlmMode::Simulated => Ok(Box::new(SimulatedLlmClient::new(self.load_script()?))),
            LlmMode::Record => {
                let recording = self.require_recording("record")?;
                let inner = SimulatedLlmClient::new(self.load_script()?);
                Ok(Box::new(RecordingLlmClient::new(inner, recording)))
            }
            LlmMode::Playback => {
                let recording = self.require_recording("playback")?;
                Ok(Box::new(PlaybackLlmClient::load(&recording)?))
            }
        }
    }

    fn load_script(&self) -> Result<Vec<LlmResponse>, ConfigError> {
        let path = self.llm_script.clone().ok_or(ConfigError::MissingEnvVar {
            mode: "simulated",
            var: "AGENTFORGE_LLM_SCRIPT",
        })?;
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::MalformedScript { path, source: e })
    }

    fn require_recording(&self, mode: &'static str) -> Result<PathBuf, ConfigError> {
        self.llm_recording.clone().ok_or(ConfigError::MissingEnvVar {
            mode,
            var: "AGENTFORGE_LLM_RECORDING",
        })
    }

    /// Seeds the three default-template contracts, then lets anything on
    /// disk under `contracts_dir` override them by name.
    pub fn load_contracts(&self) -> Result<ContractRegistry, ConfigError> {
        let mut registry = ContractRegistry::new();
        for contract in default_contracts() {
            registry.register(contract);
        }
        registry.load_dir(&self.contracts_dir)?;
        Ok(registry)
    }

    pub fn load_agents(&self, contracts: &ContractRegistry) -> Result<AgentRegistry, ConfigError> {
        let mut registry = AgentRegistry::new();
        let known: Vec<&str> = contracts.names().collect();
        registry.load_dir(&self.agents_dir, &known)?;
        Ok(registry)
    }

    /// Load a named pipeline template from `templates_dir/{name}.yaml`,
    /// falling back to the built-in default template when `name` is
    /// `"default"` and no file overrides it.
    pub fn load_template(&self, name: &str) -> Result<PipelineTemplate, ConfigError> {
        let path = self.templates_dir.join(format!("{name}.yaml"));
        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadFailed {
                path: path.clone(),
                source: e,
            })?;
            return serde_yaml::from_str(&content).map_err(|e| ConfigError::MalformedTemplate { path, source: e });
        }
        if name == "default" {
            return Ok(default_template());
        }
        Err(ConfigError::UnknownTemplate(name.to_string()))
    }
}

/// Built-in three-stage template (design -> implement -> test) used when no
/// template override exists on disk, so `start`/`design`/`implement` work
/// against a freshly initialized root with no setup.
pub fn default_template() -> PipelineTemplate {
    PipelineTemplate {
        name: "default".to_string(),
        stages: vec![
            StageDef {
                name: "design".to_string(),
                depends_on: vec![],
                step_budget: 15,
                output_contract: "design-doc".to_string(),
                review_specialists: vec![],
                max_review_rounds: 2,
                supervised: true,
            },
            StageDef {
                name: "implement".to_string(),
                depends_on: vec!["design".to_string()],
                step_budget: 30,
                output_contract: "code-change".to_string(),
                review_specialists: vec!["security".to_string(), "simplicity".to_string()],
                max_review_rounds: 2,
                supervised: false,
            },
            StageDef {
                name: "test".to_string(),
                depends_on: vec!["implement".to_string()],
                step_budget: 15,
                output_contract: "test-report".to_string(),
                review_specialists: vec![],
                max_review_rounds: 1,
                supervised: false,
            },
        ],
    }
}

/// Contracts backing the default template's three stages. A project that
/// never configures `contracts_dir` still gets a pipeline that runs end to
/// end.
fn default_contracts() -> Vec<Contract> {
    vec![
        Contract {
            name: "design-doc".to_string(),
            schema: SchemaShape {
                required_fields: vec![
                    FieldSpec {
                        name: "goal".to_string(),
                        ty: FieldType::String,
                    },
                    FieldSpec {
                        name: "acceptance_criteria".to_string(),
                        ty: FieldType::Array,
                    },
                ],
            },
            validation: vec![SemanticRule {
                field: "goal".to_string(),
                rule: RuleKind::NonEmpty,
            }],
        },
        Contract {
            name: "code-change".to_string(),
            schema: SchemaShape {
                required_fields: vec![
                    FieldSpec {
                        name: "summary".to_string(),
                        ty: FieldType::String,
                    },
                    FieldSpec {
                        name: "files_changed".to_string(),
                        ty: FieldType::Array,
                    },
                ],
            },
            validation: vec![SemanticRule {
                field: "summary".to_string(),
                rule: RuleKind::NonEmpty,
            }],
        },
        Contract {
            name: "test-report".to_string(),
            schema: SchemaShape {
                required_fields: vec![
                    FieldSpec {
                        name: "passed".to_string(),
                        ty: FieldType::Bool,
                    },
                    FieldSpec {
                        name: "summary".to_string(),
                        ty: FieldType::String,
                    },
                ],
            },
            validation: vec![],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_stages_form_a_chain() {
        let tpl = default_template();
        assert_eq!(tpl.stages.len(), 3);
        assert_eq!(tpl.get_stage("implement").unwrap().depends_on, vec!["design".to_string()]);
    }

    #[test]
    fn default_contracts_cover_every_default_stage_output() {
        let contracts = default_contracts();
        let names: Vec<&str> = contracts.iter().map(|c| c.name.as_str()).collect();
        for stage in default_template().stages {
            assert!(names.contains(&stage.output_contract.as_str()));
        }
    }
}
