//! Typed error hierarchy for the AgentForge substrate.
//!
//! One enum per component boundary, mirroring the component split in the
//! design doc. Component code returns these typed errors; only the CLI layer
//! wraps them in `anyhow::Result` with `.context(...)`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the state store (C1).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("task {0} already exists")]
    TaskAlreadyExists(String),

    #[error("failed to acquire write lock for task {task_id}: {source}")]
    LockFailed {
        task_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read state file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to atomically write state file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("escalation {0} not found")]
    EscalationNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from contract validation (C2).
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("contract {0} is not registered")]
    UnknownContract(String),

    #[error("artifact failed contract {contract}: {errors:?}")]
    Violated {
        contract: String,
        errors: Vec<String>,
    },

    #[error("failed to load contract definition {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("contract {0} has malformed schema: {1}")]
    MalformedSchema(String, String),
}

/// Errors from the conformance gate (C3).
#[derive(Debug, Error)]
pub enum ConformanceError {
    #[error("checker for layer '{layer}' exited non-zero ({code}): {stderr}")]
    CheckerFailed {
        layer: String,
        code: i32,
        stderr: String,
    },

    #[error("checker for layer '{0}' timed out")]
    Timeout(String),

    #[error("failed to spawn checker for layer '{layer}': {source}")]
    SpawnFailed {
        layer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checker for layer '{0}' produced unparseable output: {1}")]
    UnparseableOutput(String, String),
}

/// Errors from the tool bridge (C4).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' is not registered")]
    UnknownTool(String),

    #[error("tool '{tool}' is not in the agent's allowed set")]
    NotAllowed { tool: String },

    #[error("tool '{tool}' is explicitly forbidden for this agent")]
    Forbidden { tool: String },

    #[error("path '{path}' violates constraint '{constraint}' for tool '{tool}'")]
    PathConstraintViolated {
        tool: String,
        path: String,
        constraint: String,
    },

    #[error("tool '{tool}' execution failed: {message}")]
    ExecutionFailed { tool: String, message: String },
}

/// Errors from context assembly (C5).
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("section '{section}' exceeds its token budget even after compression ({actual} > {budget})")]
    BudgetExceeded {
        section: String,
        actual: usize,
        budget: usize,
    },

    #[error("unknown task kind '{0}', cannot select current-state body")]
    UnknownTaskKind(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors from the minimal-context executor (C6).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("step cancelled")]
    Cancelled,

    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("tool dispatch failed: {0}")]
    Tool(#[from] ToolError),

    #[error("context assembly failed: {0}")]
    Context(#[from] ContextError),

    #[error("state persistence failed: {0}")]
    State(#[from] StateError),

    #[error("step timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Errors from the agent registry (C7).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent definition '{0}' not found")]
    UnknownAgent(String),

    #[error("agent definition '{agent}' is invalid: allowed and forbidden tool sets overlap on {tool}")]
    OverlappingToolSets { agent: String, tool: String },

    #[error("agent definition '{agent}' references unknown output contract '{contract}'")]
    UnknownOutputContract { agent: String, contract: String },

    #[error("agent definition '{agent}' references unknown role '{role}' in orchestration")]
    UnknownRole { agent: String, role: String },

    #[error("failed to load agent definition {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from stage execution (C8).
#[derive(Debug, Error)]
pub enum StageError {
    #[error("step budget of {budget} exhausted for stage '{stage}'")]
    StepBudgetExhausted { stage: String, budget: u32 },

    #[error("stage '{stage}' output failed contract validation: {0}", source)]
    OutputInvalid {
        stage: String,
        #[source]
        source: ContractError,
    },

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Errors from the pipeline controller (C9).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage '{0}' is not defined in the pipeline template")]
    UnknownStage(String),

    #[error("external artifact refused: {0}")]
    ExternalArtifactRefused(String),

    #[error("imported artifact is stale: {reason}")]
    StaleExternal { reason: String },

    #[error("review loop for stage '{stage}' exhausted {attempts} attempts with blocking issues remaining")]
    ReviewBlocking { stage: String, attempts: u32 },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Escalation(#[from] EscalationError),
}

/// Errors from the escalation manager (C10).
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("escalation {0} not found")]
    NotFound(String),

    #[error("escalation {0} already resolved")]
    AlreadyResolved(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors from the audit log (C11).
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("append_step called with no active run")]
    NoActiveRun,

    #[error("failed to serialize audit record: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    #[error("failed to write audit record to {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("step index {expected} expected but found {actual}; log is not contiguous")]
    NonContiguous { expected: u64, actual: u64 },
}

/// Errors from the LLM client (C12).
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("response could not be parsed: {0}")]
    UnparseableResponse(String),

    #[error("simulated-mode script exhausted: no more scripted responses for step {step}")]
    ScriptExhausted { step: u64 },

    #[error("recording file {path} could not be read: {source}")]
    RecordingReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("playback recording has no entry for step {0}")]
    PlaybackMiss(u64),
}
