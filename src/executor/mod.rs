//! Minimal-context step executor (C6).
//!
//! Runs one load -> context -> call -> parse -> dispatch -> verify ->
//! persist -> return loop, with no hardcoded CLI and two cancellation
//! checkpoints: right after the LLM call returns (before any tool runs) and
//! immediately before the step is persisted.

use crate::conformance::{ConformanceGate, VerificationBundle};
use crate::context::{AssembledContext, ContextBuilder, ContextInputs, WorkingMemory, WorkingMemoryEntry};
use crate::errors::ExecutorError;
use crate::llm::{LlmClient, LlmRequest, ToolCall};
use crate::state::{StateStore, StepRecord};
use crate::tools::{ToolBridge, ToolPolicy};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation flag checked between the LLM call and tool
/// dispatch, and again before the step is atomically persisted.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct StepOutcome {
    pub step: u64,
    pub text: String,
    pub tool_results: Vec<(ToolCall, serde_json::Value)>,
    pub verification: VerificationBundle,
}

pub struct MinimalContextExecutor<'a> {
    pub state: &'a StateStore,
    pub llm: &'a dyn LlmClient,
    pub tools: &'a ToolBridge,
    pub context_builder: &'a ContextBuilder,
    pub conformance: &'a mut ConformanceGate,
}

impl<'a> MinimalContextExecutor<'a> {
    /// Execute a single step for `task_id`, at `stage` and `step`, rendering
    /// `system_prompt` with `working_memory` recent history, under `policy`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_step(
        &mut self,
        task_id: &str,
        step: u64,
        system_prompt: &str,
        working_memory: &mut WorkingMemory,
        policy: &ToolPolicy,
        available_actions: &[String],
        cancel: &CancellationToken,
    ) -> Result<StepOutcome, ExecutorError> {
        // 1. load
        let task = self.state.load_task(task_id)?;
        let task_state = self.state.load_state(task_id)?;
        let current_stage = task_state
            .current_stage
            .clone()
            .unwrap_or_else(|| task.entry_stage.clone());
        let stage_state = task_state
            .stage(&current_stage)
            .cloned()
            .unwrap_or_else(|| crate::state::StageState {
                stage: current_stage.clone(),
                status: crate::state::StagePhase::Pending,
                iteration: 0,
                artifact_hash: None,
                review_feedback: Vec::new(),
                updated_at: Utc::now(),
            });

        // 2. context
        let inputs = ContextInputs {
            task: &task,
            task_state: &task_state,
            stage_state: &stage_state,
            system_prompt,
            working_memory,
            available_actions,
        };
        let AssembledContext { prompt, .. } = self.context_builder.build(&inputs)?;

        // 3. call
        let response = self
            .llm
            .complete(&LlmRequest {
                step,
                prompt,
            })
            .await?;

        // Cancellation checkpoint: between LLM response and tool dispatch.
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        // 4. parse (response.tool_calls already structured by the client)
        // 5. dispatch
        let mut tool_results = Vec::new();
        let mut modified_files = Vec::new();
        for call in &response.tool_calls {
            let result = self.tools.dispatch(policy, &call.name, &call.input)?;
            if let Some(path) = call.input.get("path").and_then(|v| v.as_str()) {
                modified_files.push(path.to_string());
            }
            tool_results.push((call.clone(), result));
        }

        // 6. verify
        let verification = self
            .conformance
            .run(&modified_files, &HashMap::new())
            .await;

        // Cancellation checkpoint: before atomic persist.
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        // 7. persist
        let summary = if response.text.is_empty() {
            format!("ran {} tool call(s)", tool_results.len())
        } else {
            response.text.clone()
        };
        let record = self.state.append_step(
            task_id,
            StepRecord {
                step,
                timestamp: Utc::now(),
                stage: stage_state.stage.clone(),
                agent_role: "executor".to_string(),
                action: format!("{:?}", response.tool_calls.iter().map(|c| &c.name).collect::<Vec<_>>()),
                success: verification.passed_all() || tool_results.is_empty(),
                summary: summary.clone(),
            },
        )?;
        working_memory.push(WorkingMemoryEntry {
            step: record.step,
            summary,
            pinned: false,
        });

        // 8. return
        Ok(StepOutcome {
            step: record.step,
            text: response.text,
            tool_results,
            verification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::ConformanceGate;
    use crate::context::TokenBudgets;
    use crate::llm::{LlmResponse, SimulatedLlmClient};
    use crate::state::StateStore;
    use tempfile::tempdir;

    fn make_task(store: &StateStore, id: &str) {
        store
            .create_task(id, "add logging", "feature", "default", "implement", "done")
            .unwrap();
    }

    #[tokio::test]
    async fn run_step_persists_and_returns_outcome() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        make_task(&store, "t-1");

        let llm = SimulatedLlmClient::new(vec![LlmResponse {
            text: "done thinking".into(),
            tool_calls: vec![],
        }]);
        let tools = ToolBridge::new();
        let context_builder = ContextBuilder::new(TokenBudgets::default());
        let mut conformance = ConformanceGate::new(vec![]);
        let mut wm = WorkingMemory::new(10);
        let cancel = CancellationToken::new();

        let mut executor = MinimalContextExecutor {
            state: &store,
            llm: &llm,
            tools: &tools,
            context_builder: &context_builder,
            conformance: &mut conformance,
        };

        let outcome = executor
            .run_step("t-1", 0, "be careful", &mut wm, &ToolPolicy::default(), &[], &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.text, "done thinking");
        assert_eq!(wm.len(), 1);

        let steps = store.load_steps("t-1").unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn run_step_honors_cancellation_before_dispatch() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        make_task(&store, "t-1");

        let llm = SimulatedLlmClient::new(vec![LlmResponse {
            text: "ok".into(),
            tool_calls: vec![],
        }]);
        let tools = ToolBridge::new();
        let context_builder = ContextBuilder::new(TokenBudgets::default());
        let mut conformance = ConformanceGate::new(vec![]);
        let mut wm = WorkingMemory::new(10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut executor = MinimalContextExecutor {
            state: &store,
            llm: &llm,
            tools: &tools,
            context_builder: &context_builder,
            conformance: &mut conformance,
        };

        let result = executor
            .run_step("t-1", 0, "be careful", &mut wm, &ToolPolicy::default(), &[], &cancel)
            .await;
        assert!(matches!(result, Err(ExecutorError::Cancelled)));
    }
}
