//! Pipeline controller (C9): stage sequencing, external-artifact admission,
//! the review loop, and the iteration decision loop.
//!
//! Stages form a named dependency graph (`depends_on` per stage, not
//! necessarily linear), and a stage's completion gates on contract-validated
//! output rather than a promise-tag string match. The review loop keeps a
//! gating-vs-advisory split per specialist verdict, but takes the verdict
//! list as input rather than dispatching reviewers itself — the LLM calls
//! that produce them are the stage executor's concern, not the
//! controller's.

pub mod fingerprint;

use crate::contracts::{ContractRegistry, ValidationResult};
use crate::errors::PipelineError;
use crate::state::TaskState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDef {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub step_budget: u32,
    pub output_contract: String,
    #[serde(default)]
    pub review_specialists: Vec<String>,
    #[serde(default)]
    pub max_review_rounds: u32,
    #[serde(default)]
    pub supervised: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTemplate {
    pub name: String,
    pub stages: Vec<StageDef>,
}

impl PipelineTemplate {
    pub fn get_stage(&self, name: &str) -> Option<&StageDef> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// The next stage after `task_state`'s completed stages, in declared
    /// order, whose dependencies are all already completed. `None` means the
    /// pipeline has run to its end.
    pub fn next_stage(&self, task_state: &TaskState) -> Option<&StageDef> {
        let completed: Vec<&str> = task_state
            .stages
            .iter()
            .filter(|s| matches!(s.status, crate::state::StagePhase::Completed))
            .map(|s| s.stage.as_str())
            .collect();
        self.stages.iter().find(|stage| {
            !completed.contains(&stage.name.as_str())
                && stage.depends_on.iter().all(|d| completed.contains(&d.as_str()))
        })
    }
}

/// A single specialist's verdict within one review round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub specialist: String,
    pub gating: bool,
    pub passed: bool,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReviewRound {
    pub outcomes: Vec<ReviewOutcome>,
}

impl ReviewRound {
    pub fn blocking(&self) -> bool {
        self.outcomes.iter().any(|o| o.gating && !o.passed)
    }

    pub fn feedback_summary(&self) -> String {
        self.outcomes
            .iter()
            .filter(|o| !o.passed)
            .filter_map(|o| o.feedback.as_deref())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct PipelineController<'a> {
    pub contracts: &'a ContractRegistry,
}

impl<'a> PipelineController<'a> {
    pub fn new(contracts: &'a ContractRegistry) -> Self {
        Self { contracts }
    }

    /// Admit an artifact produced outside the pipeline (e.g. `implement
    /// --from-spec`). Refuses artifacts whose recorded fingerprint no longer
    /// matches the codebase the artifact claims to describe, then validates
    /// the artifact's shape against its contract.
    pub fn admit_external_artifact(
        &self,
        artifact: &serde_json::Value,
        contract_name: &str,
        recorded_fingerprint: &str,
        current_fingerprint: &str,
    ) -> Result<ValidationResult, PipelineError> {
        if recorded_fingerprint != current_fingerprint {
            return Err(PipelineError::StaleExternal {
                reason: format!(
                    "codebase fingerprint changed since artifact was captured ({recorded_fingerprint} != {current_fingerprint})"
                ),
            });
        }
        let result = self.contracts.validate(artifact, contract_name)?;
        if !result.passed {
            return Err(PipelineError::ExternalArtifactRefused(result.errors.join("; ")));
        }
        Ok(result)
    }

    /// Evaluate one review round against a stage's remaining attempts.
    /// Returns `Ok(true)` when the stage may proceed (no blocking verdicts),
    /// `Ok(false)` when another revision round is warranted, and an error
    /// once blocking verdicts persist past `max_review_rounds`.
    pub fn evaluate_review_round(
        &self,
        stage: &StageDef,
        round: &ReviewRound,
        attempts_so_far: u32,
    ) -> Result<bool, PipelineError> {
        if !round.blocking() {
            return Ok(true);
        }
        if attempts_so_far >= stage.max_review_rounds {
            return Err(PipelineError::ReviewBlocking {
                stage: stage.name.clone(),
                attempts: attempts_so_far,
            });
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{Contract, FieldSpec, FieldType, SchemaShape};
    use crate::state::{StagePhase, StageState};
    use chrono::Utc;
    use serde_json::json;

    fn template() -> PipelineTemplate {
        PipelineTemplate {
            name: "default".into(),
            stages: vec![
                StageDef {
                    name: "design".into(),
                    depends_on: vec![],
                    step_budget: 10,
                    output_contract: "design-doc".into(),
                    review_specialists: vec![],
                    max_review_rounds: 2,
                    supervised: true,
                },
                StageDef {
                    name: "implement".into(),
                    depends_on: vec!["design".into()],
                    step_budget: 20,
                    output_contract: "code-change".into(),
                    review_specialists: vec!["security".into()],
                    max_review_rounds: 2,
                    supervised: false,
                },
            ],
        }
    }

    fn stage_state(name: &str, status: StagePhase) -> StageState {
        StageState {
            stage: name.to_string(),
            status,
            iteration: 1,
            artifact_hash: None,
            review_feedback: vec![],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn next_stage_is_entry_stage_when_nothing_completed() {
        let tpl = template();
        let task_state = TaskState::default();
        let next = tpl.next_stage(&task_state).unwrap();
        assert_eq!(next.name, "design");
    }

    #[test]
    fn next_stage_waits_for_dependency() {
        let tpl = template();
        let mut task_state = TaskState::default();
        task_state.stages.push(stage_state("design", StagePhase::Running));
        let next = tpl.next_stage(&task_state).unwrap();
        assert_eq!(next.name, "design");
    }

    #[test]
    fn next_stage_advances_once_dependency_completes() {
        let tpl = template();
        let mut task_state = TaskState::default();
        task_state.stages.push(stage_state("design", StagePhase::Completed));
        let next = tpl.next_stage(&task_state).unwrap();
        assert_eq!(next.name, "implement");
    }

    #[test]
    fn next_stage_none_when_all_complete() {
        let tpl = template();
        let mut task_state = TaskState::default();
        task_state.stages.push(stage_state("design", StagePhase::Completed));
        task_state.stages.push(stage_state("implement", StagePhase::Completed));
        assert!(tpl.next_stage(&task_state).is_none());
    }

    #[test]
    fn review_round_blocking_requires_gating_failure() {
        let round = ReviewRound {
            outcomes: vec![ReviewOutcome {
                specialist: "simplicity".into(),
                gating: false,
                passed: false,
                feedback: Some("too clever".into()),
            }],
        };
        assert!(!round.blocking());
    }

    #[test]
    fn evaluate_review_round_allows_progress_with_attempts_left() {
        let contracts = ContractRegistry::new();
        let controller = PipelineController::new(&contracts);
        let stage = template().stages[1].clone();
        let round = ReviewRound {
            outcomes: vec![ReviewOutcome {
                specialist: "security".into(),
                gating: true,
                passed: false,
                feedback: Some("sql injection risk".into()),
            }],
        };
        let result = controller.evaluate_review_round(&stage, &round, 0).unwrap();
        assert!(!result);
    }

    #[test]
    fn evaluate_review_round_escalates_once_attempts_exhausted() {
        let contracts = ContractRegistry::new();
        let controller = PipelineController::new(&contracts);
        let stage = template().stages[1].clone();
        let round = ReviewRound {
            outcomes: vec![ReviewOutcome {
                specialist: "security".into(),
                gating: true,
                passed: false,
                feedback: None,
            }],
        };
        let result = controller.evaluate_review_round(&stage, &round, 2);
        assert!(matches!(result, Err(PipelineError::ReviewBlocking { .. })));
    }

    #[test]
    fn admit_external_artifact_refuses_stale_fingerprint() {
        let mut contracts = ContractRegistry::new();
        contracts.register(Contract {
            name: "design-doc".into(),
            schema: SchemaShape {
                required_fields: vec![FieldSpec {
                    name: "goal".into(),
                    ty: FieldType::String,
                }],
            },
            validation: vec![],
        });
        let controller = PipelineController::new(&contracts);
        let result = controller.admit_external_artifact(&json!({"goal": "x"}), "design-doc", "abc", "def");
        assert!(matches!(result, Err(PipelineError::StaleExternal { .. })));
    }

    #[test]
    fn admit_external_artifact_passes_when_fresh_and_valid() {
        let mut contracts = ContractRegistry::new();
        contracts.register(Contract {
            name: "design-doc".into(),
            schema: SchemaShape {
                required_fields: vec![FieldSpec {
                    name: "goal".into(),
                    ty: FieldType::String,
                }],
            },
            validation: vec![],
        });
        let controller = PipelineController::new(&contracts);
        let result = controller
            .admit_external_artifact(&json!({"goal": "x"}), "design-doc", "abc", "abc")
            .unwrap();
        assert!(result.passed);
    }
}
