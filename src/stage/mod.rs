//! Stage execution (C8): drives the minimal-context executor in a loop
//! until the stage's output artifact validates against its contract, a
//! step budget is exhausted, or the loop is cancelled.
//!
//! Grounded on the orchestrator's phase loop — iterate until the promise
//! tag appears or the iteration budget is exhausted — generalized from a
//! promise-tag text match to contract validation of the final artifact.

use crate::conformance::ConformanceGate;
use crate::context::{ContextBuilder, WorkingMemory};
use crate::contracts::ContractRegistry;
use crate::errors::StageError;
use crate::executor::{CancellationToken, MinimalContextExecutor};
use crate::llm::LlmClient;
use crate::state::StateStore;
use crate::tools::{ToolBridge, ToolPolicy};
use crate::util::extract_json_object;

pub struct StageRunConfig<'a> {
    pub task_id: &'a str,
    pub stage: &'a str,
    pub step_budget: u32,
    pub system_prompt: &'a str,
    pub output_contract: &'a str,
    pub policy: &'a ToolPolicy,
    pub available_actions: &'a [String],
}

pub struct StageRunOutcome {
    pub steps_used: u32,
    pub final_artifact: Option<serde_json::Value>,
}

/// Drives the executor loop for one stage. Each iteration's free-text
/// response is treated as a draft artifact candidate; once it parses as
/// JSON and validates against `output_contract`, the stage completes.
pub struct StageExecutor<'a> {
    pub state: &'a StateStore,
    pub llm: &'a dyn LlmClient,
    pub tools: &'a ToolBridge,
    pub context_builder: &'a ContextBuilder,
    pub conformance: &'a mut ConformanceGate,
    pub contracts: &'a ContractRegistry,
}

impl<'a> StageExecutor<'a> {
    pub async fn run(
        &mut self,
        cfg: &StageRunConfig<'_>,
        cancel: &CancellationToken,
    ) -> Result<StageRunOutcome, StageError> {
        let mut working_memory = WorkingMemory::new(20);
        let mut steps_used = 0;

        loop {
            if steps_used >= cfg.step_budget {
                return Err(StageError::StepBudgetExhausted {
                    stage: cfg.stage.to_string(),
                    budget: cfg.step_budget,
                });
            }

            let mut executor = MinimalContextExecutor {
                state: self.state,
                llm: self.llm,
                tools: self.tools,
                context_builder: self.context_builder,
                conformance: self.conformance,
            };

            let outcome = executor
                .run_step(
                    cfg.task_id,
                    steps_used as u64,
                    cfg.system_prompt,
                    &mut working_memory,
                    cfg.policy,
                    cfg.available_actions,
                    cancel,
                )
                .await?;
            steps_used += 1;

            let parsed = serde_json::from_str::<serde_json::Value>(&outcome.text)
                .ok()
                .or_else(|| extract_json_object(&outcome.text).and_then(|o| serde_json::from_str(&o).ok()));

            if let Some(candidate) = parsed {
                let validation = self
                    .contracts
                    .validate(&candidate, cfg.output_contract)
                    .map_err(|source| StageError::OutputInvalid {
                        stage: cfg.stage.to_string(),
                        source,
                    })?;
                if validation.passed {
                    return Ok(StageRunOutcome {
                        steps_used,
                        final_artifact: Some(candidate),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, SimulatedLlmClient};
    use crate::state::StateStore;
    use serde_json::json;
    use tempfile::tempdir;

    fn spec_output_contract() -> crate::contracts::Contract {
        use crate::contracts::{Contract, FieldSpec, FieldType, RuleKind, SchemaShape, SemanticRule};
        Contract {
            name: "design-doc".into(),
            schema: SchemaShape {
                required_fields: vec![FieldSpec {
                    name: "goal".into(),
                    ty: FieldType::String,
                }],
            },
            validation: vec![SemanticRule {
                field: "goal".into(),
                rule: RuleKind::NonEmpty,
            }],
        }
    }

    #[tokio::test]
    async fn run_completes_once_output_validates() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store
            .create_task("t-1", "add oauth2", "feature", "default", "design", "done")
            .unwrap();

        let llm = SimulatedLlmClient::new(vec![
            LlmResponse {
                text: "thinking about the design".into(),
                tool_calls: vec![],
            },
            LlmResponse {
                text: json!({"goal": "Add OAuth2 login"}).to_string(),
                tool_calls: vec![],
            },
        ]);
        let tools = ToolBridge::new();
        let context_builder = ContextBuilder::new(crate::context::TokenBudgets::default());
        let mut conformance = ConformanceGate::new(vec![]);
        let mut contracts = ContractRegistry::new();
        contracts.register(spec_output_contract());

        let mut stage_executor = StageExecutor {
            state: &store,
            llm: &llm,
            tools: &tools,
            context_builder: &context_builder,
            conformance: &mut conformance,
            contracts: &contracts,
        };

        let policy = ToolPolicy::default();
        let cfg = StageRunConfig {
            task_id: "t-1",
            stage: "design",
            step_budget: 5,
            system_prompt: "draft a design",
            output_contract: "design-doc",
            policy: &policy,
            available_actions: &[],
        };
        let cancel = CancellationToken::new();
        let outcome = stage_executor.run(&cfg, &cancel).await.unwrap();
        assert_eq!(outcome.steps_used, 2);
        assert!(outcome.final_artifact.is_some());
    }

    #[tokio::test]
    async fn run_exhausts_step_budget_without_valid_output() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store
            .create_task("t-1", "add oauth2", "feature", "default", "design", "done")
            .unwrap();

        let llm = SimulatedLlmClient::new(vec![
            LlmResponse {
                text: "still thinking".into(),
                tool_calls: vec![],
            },
            LlmResponse {
                text: "still thinking".into(),
                tool_calls: vec![],
            },
        ]);
        let tools = ToolBridge::new();
        let context_builder = ContextBuilder::new(crate::context::TokenBudgets::default());
        let mut conformance = ConformanceGate::new(vec![]);
        let mut contracts = ContractRegistry::new();
        contracts.register(spec_output_contract());

        let mut stage_executor = StageExecutor {
            state: &store,
            llm: &llm,
            tools: &tools,
            context_builder: &context_builder,
            conformance: &mut conformance,
            contracts: &contracts,
        };

        let policy = ToolPolicy::default();
        let cfg = StageRunConfig {
            task_id: "t-1",
            stage: "design",
            step_budget: 2,
            system_prompt: "draft a design",
            output_contract: "design-doc",
            policy: &policy,
            available_actions: &[],
        };
        let cancel = CancellationToken::new();
        let result = stage_executor.run(&cfg, &cancel).await;
        assert!(matches!(result, Err(StageError::StepBudgetExhausted { .. })));
    }
}
