//! CLI command handlers. Each submodule implements one or more of the
//! `agentforge` subcommands, wiring the C1-C12 substrate together; `main.rs`
//! only parses arguments and maps the returned [`CliError`] to an exit code.

pub mod escalation_cmd;
pub mod iteration;
pub mod pipeline_cmds;
pub mod replay_cmd;
pub mod runner;
pub mod status;

use crate::config::ConfigError;
use crate::errors::{AgentError, AuditError, ContractError, EscalationError, PipelineError, StateError};
use thiserror::Error;

/// Unifies every component error a CLI command can hit, tagged with the
/// exit code the spec's CLI surface assigns to it:
/// 0 success, 1 violations/escalation remain, 2 configuration error,
/// 3 runtime error, 4 required baseline/external input missing.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    MissingInput(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Escalation(#[from] EscalationError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("{0}")]
    Runtime(String),

    /// A stage ran to its step budget or a review round ran out of
    /// attempts without producing an acceptable artifact: the task is now
    /// escalated, not broken.
    #[error("{0}")]
    Unresolved(String),
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Configuration(e.to_string())
    }
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Configuration(_) => 2,
            CliError::MissingInput(_) => 4,
            CliError::Unresolved(_) => 1,
            CliError::Pipeline(PipelineError::ReviewBlocking { .. }) => 1,
            CliError::Pipeline(PipelineError::ExternalArtifactRefused(_)) => 4,
            CliError::Pipeline(PipelineError::StaleExternal { .. }) => 4,
            CliError::Pipeline(_) => 3,
            CliError::State(_) | CliError::Agent(_) | CliError::Contract(_) | CliError::Escalation(_) | CliError::Audit(_) => 3,
            CliError::Runtime(_) => 3,
        }
    }
}
