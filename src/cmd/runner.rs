//! The shared stage-driving loop behind `start`/`design`/`implement`/`test`/
//! `fix`/`continue`: walks a [`PipelineTemplate`] stage by stage, running
//! each through [`StageExecutor`], evaluating review rounds through
//! [`PipelineController`], and raising an escalation whenever a stage can't
//! produce an acceptable artifact on its own.

use crate::cmd::CliError;
use crate::config::Config;
use crate::conformance::ConformanceGate;
use crate::context::{ContextBuilder, TokenBudgets};
use crate::errors::{PipelineError, StageError};
use crate::escalation::{EscalationManager, EscalationReason};
use crate::executor::CancellationToken;
use crate::llm::{LlmClient, LlmRequest};
use crate::pipeline::{PipelineController, PipelineTemplate, ReviewOutcome, ReviewRound, StageDef};
use crate::state::{StagePhase, StateStore, TaskStatus};
use crate::tools::{self, ToolPolicy};
use crate::agents::AgentRegistry;
use crate::audit::{AuditEvent, AuditLogger};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    AwaitingDecision { stage: String, escalation_id: String },
    Escalated { stage: String, escalation_id: String, reason: String },
    StoppedAtStage { stage: String },
}

const AVAILABLE_ACTIONS: &[&str] = &["read_file", "edit_file", "list_files", "run_command"];

pub async fn drive(
    cfg: &Config,
    project_dir: &Path,
    task_id: &str,
    template: &PipelineTemplate,
    stop_after_stage: Option<&str>,
) -> Result<RunOutcome, CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let contracts = cfg.load_contracts()?;
    let agents = cfg.load_agents(&contracts)?;
    let llm = cfg.build_llm_client(project_dir.to_path_buf())?;
    let tool_bridge = tools::filesystem_bridge(project_dir.to_path_buf());
    let context_builder = ContextBuilder::new(TokenBudgets::default());
    let mut conformance = ConformanceGate::new(vec![]);
    let controller = PipelineController::new(&contracts);
    let escalations = EscalationManager::new(&store);

    let mut logger = AuditLogger::new(&cfg.audit_dir(task_id));
    if !logger.load_current()? {
        logger.start_run(task_id)?;
    }

    let task = store.load_task(task_id)?;

    loop {
        let task_state = store.load_state(task_id)?;
        let Some(stage_def) = template.next_stage(&task_state) else {
            logger.append_event(AuditEvent::PipelineExit {
                reason: "completed".to_string(),
                timestamp: chrono::Utc::now(),
            })?;
            logger.finish_run()?;
            store.update_state(task_id, |mut ts| {
                ts.status = TaskStatus::Completed;
                ts
            })?;
            tracing::info!(task_id, "pipeline completed");
            return Ok(RunOutcome::Completed);
        };

        if let Some(existing) = task_state.stage(&stage_def.name) {
            if existing.status == StagePhase::Iterating {
                return Ok(RunOutcome::AwaitingDecision {
                    stage: stage_def.name.clone(),
                    escalation_id: pending_escalation_id(&escalations, task_id)?,
                });
            }
        }

        tracing::info!(task_id, stage = %stage_def.name, from = ?task_state.current_stage, "entering stage");
        logger.append_event(AuditEvent::StageTransition {
            from_stage: task_state.current_stage.clone(),
            to_stage: stage_def.name.clone(),
            timestamp: chrono::Utc::now(),
        })?;
        store.update_state(task_id, |mut ts| {
            ts.current_stage = Some(stage_def.name.clone());
            ts.stage_mut(&stage_def.name).status = StagePhase::Running;
            ts
        })?;

        let agent = agents.by_role(&stage_def.name).next();
        let mut vars = HashMap::new();
        vars.insert("goal".to_string(), task.request.clone());
        let system_prompt = agent
            .map(|a| a.render_system_prompt(&vars))
            .unwrap_or_else(|| default_system_prompt(&stage_def.name, &task.request));
        let policy = agent.map(|a| a.tool_policy.clone()).unwrap_or_else(ToolPolicy::default);
        let available_actions: Vec<String> = AVAILABLE_ACTIONS.iter().map(|s| s.to_string()).collect();
        let cancel = CancellationToken::new();

        let mut executor = crate::stage::StageExecutor {
            state: &store,
            llm: llm.as_ref(),
            tools: &tool_bridge,
            context_builder: &context_builder,
            conformance: &mut conformance,
            contracts: &contracts,
        };
        let stage_cfg = crate::stage::StageRunConfig {
            task_id,
            stage: &stage_def.name,
            step_budget: stage_def.step_budget,
            system_prompt: &system_prompt,
            output_contract: &stage_def.output_contract,
            policy: &policy,
            available_actions: &available_actions,
        };

        let mut outcome = match executor.run(&stage_cfg, &cancel).await {
            Ok(o) => o,
            Err(StageError::StepBudgetExhausted { stage, budget }) => {
                tracing::warn!(task_id, stage, budget, "step budget exhausted, raising escalation");
                let esc = escalations.raise(
                    task_id,
                    &stage,
                    EscalationReason::StepBudgetExhausted,
                    &format!("exhausted step budget of {budget} without a contract-valid artifact"),
                )?;
                store.update_state(task_id, |mut ts| {
                    ts.stage_mut(&stage).status = StagePhase::Escalated;
                    ts.status = TaskStatus::Escalated;
                    ts
                })?;
                return Ok(RunOutcome::Escalated {
                    stage,
                    escalation_id: esc.id,
                    reason: "step_budget_exhausted".to_string(),
                });
            }
            Err(StageError::OutputInvalid { stage, source }) => {
                return Err(CliError::Configuration(format!(
                    "stage '{stage}' references a malformed or unregistered output contract: {source}"
                )));
            }
            Err(StageError::Executor(e)) => return Err(CliError::Runtime(e.to_string())),
        };

        let mut attempts = task_state.stage(&stage_def.name).map(|s| s.iteration).unwrap_or(0);
        loop {
            let artifact = outcome.final_artifact.clone().expect("stage executor only returns on a valid artifact");
            if stage_def.review_specialists.is_empty() {
                break;
            }
            let round = run_review(stage_def, &agents, llm.as_ref(), &artifact, attempts).await?;
            for verdict in &round.outcomes {
                logger.append_event(AuditEvent::ReviewVerdict {
                    stage: stage_def.name.clone(),
                    specialist: verdict.specialist.clone(),
                    gating: verdict.gating,
                    passed: verdict.passed,
                    timestamp: chrono::Utc::now(),
                })?;
            }
            match controller.evaluate_review_round(stage_def, &round, attempts) {
                Ok(true) => break,
                Ok(false) => {
                    attempts += 1;
                    store.update_state(task_id, |mut ts| {
                        let ss = ts.stage_mut(&stage_def.name);
                        ss.iteration = attempts;
                        ss.review_feedback.push(round.feedback_summary());
                        ss
                            .updated_at = chrono::Utc::now();
                        ts
                    })?;
                    outcome = executor.run(&stage_cfg, &cancel).await.map_err(stage_error_to_cli)?;
                }
                Err(PipelineError::ReviewBlocking { stage, attempts }) => {
                    let esc = escalations.raise(
                        task_id,
                        &stage,
                        EscalationReason::ReviewBlocking,
                        &format!("{attempts} review round(s) still blocking: {}", round.feedback_summary()),
                    )?;
                    store.update_state(task_id, |mut ts| {
                        ts.stage_mut(&stage).status = StagePhase::Escalated;
                        ts.status = TaskStatus::Escalated;
                        ts
                    })?;
                    return Ok(RunOutcome::Escalated {
                        stage,
                        escalation_id: esc.id,
                        reason: "review_blocking".to_string(),
                    });
                }
                Err(other) => return Err(other.into()),
            }
        }

        let artifact = outcome.final_artifact.expect("stage executor only returns on a valid artifact");
        let bytes = serde_json::to_vec(&artifact).map_err(|e| CliError::Runtime(e.to_string()))?;
        let hash = store.save_artifact(task_id, &stage_def.name, &bytes)?;
        logger.append_event(AuditEvent::IterationPresented {
            stage: stage_def.name.clone(),
            iteration: attempts,
            artifact_hash: hash.clone(),
            timestamp: chrono::Utc::now(),
        })?;

        if stage_def.supervised {
            store.update_state(task_id, |mut ts| {
                let ss = ts.stage_mut(&stage_def.name);
                ss.status = StagePhase::Iterating;
                ss.artifact_hash = Some(hash.clone());
                ts
            })?;
            let esc = escalations.raise(task_id, &stage_def.name, EscalationReason::Requested, "awaiting iteration decision")?;
            return Ok(RunOutcome::AwaitingDecision {
                stage: stage_def.name.clone(),
                escalation_id: esc.id,
            });
        }

        store.update_state(task_id, |mut ts| {
            let ss = ts.stage_mut(&stage_def.name);
            ss.status = StagePhase::Completed;
            ss.artifact_hash = Some(hash.clone());
            ts
        })?;

        if stop_after_stage == Some(stage_def.name.as_str()) {
            return Ok(RunOutcome::StoppedAtStage { stage: stage_def.name.clone() });
        }
    }
}

fn stage_error_to_cli(e: StageError) -> CliError {
    match e {
        StageError::StepBudgetExhausted { stage, budget } => {
            CliError::Unresolved(format!("stage '{stage}' exhausted its step budget of {budget} during review revision"))
        }
        StageError::OutputInvalid { stage, source } => {
            CliError::Configuration(format!("stage '{stage}' output contract error: {source}"))
        }
        StageError::Executor(inner) => CliError::Runtime(inner.to_string()),
    }
}

fn default_system_prompt(stage: &str, request: &str) -> String {
    format!(
        "You are responsible for the '{stage}' stage of: {request}\n\
         Work step by step using the available tools. Once you are done, respond with a JSON \
         object matching this stage's output contract and nothing else."
    )
}

async fn run_review(
    stage: &StageDef,
    agents: &AgentRegistry,
    llm: &dyn LlmClient,
    artifact: &serde_json::Value,
    attempt: u32,
) -> Result<ReviewRound, CliError> {
    let mut outcomes = Vec::new();
    for specialist in &stage.review_specialists {
        let agent = agents.get(specialist).ok();
        let gating = agent.map(|a| a.gating).unwrap_or(true);
        let prompt = format!(
            "Review this '{}' stage artifact as the {specialist} reviewer. \
             Respond with a JSON object: {{\"passed\": bool, \"feedback\": string}}.\n\n{artifact}",
            stage.name
        );
        let response = llm
            .complete(&LlmRequest {
                step: attempt as u64,
                prompt,
            })
            .await
            .map_err(|e| CliError::Runtime(e.to_string()))?;
        let parsed: serde_json::Value =
            serde_json::from_str(&response.text).unwrap_or_else(|_| serde_json::json!({"passed": true}));
        let passed = parsed.get("passed").and_then(|v| v.as_bool()).unwrap_or(true);
        let feedback = parsed.get("feedback").and_then(|v| v.as_str()).map(str::to_string);
        outcomes.push(ReviewOutcome {
            specialist: specialist.clone(),
            gating,
            passed,
            feedback,
        });
    }
    Ok(ReviewRound { outcomes })
}

fn pending_escalation_id(escalations: &EscalationManager, task_id: &str) -> Result<String, CliError> {
    Ok(escalations
        .pending(task_id)?
        .into_iter()
        .next()
        .map(|e| e.id)
        .unwrap_or_default())
}

pub fn seed_task(store: &StateStore, task_id: &str, request: &str, goal_type: &str, template: &PipelineTemplate) -> Result<(), CliError> {
    let entry = template.stages.first().map(|s| s.name.clone()).unwrap_or_default();
    let exit = template.stages.last().map(|s| s.name.clone()).unwrap_or_default();
    store.create_task(task_id, request, goal_type, &template.name, &entry, &exit)?;
    Ok(())
}
