//! `feedback`, `approve`, and `reject` — resolving the `Requested`
//! escalation a supervised stage raises once it has a draft artifact ready
//! for a human look, then either re-driving the stage or ending the task.

use crate::cmd::runner::{self, RunOutcome};
use crate::cmd::CliError;
use crate::config::Config;
use crate::escalation::{Decision, EscalationManager, EscalationReason};
use crate::state::{StagePhase, StateStore, TaskStatus};
use std::path::Path;

fn pending_iteration_escalation(
    escalations: &EscalationManager,
    task_id: &str,
) -> Result<crate::escalation::Escalation, CliError> {
    escalations
        .pending(task_id)?
        .into_iter()
        .find(|e| e.reason == EscalationReason::Requested)
        .ok_or_else(|| CliError::MissingInput(format!("task {task_id} has no pending iteration decision")))
}

pub async fn approve(cfg: &Config, project_dir: &Path, task_id: &str) -> Result<RunOutcome, CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let escalations = EscalationManager::new(&store);
    let escalation = pending_iteration_escalation(&escalations, task_id)?;
    escalations.resolve(task_id, &escalation.id, Decision::Approve)?;

    store.update_state(task_id, |mut ts| {
        ts.stage_mut(&escalation.stage).status = StagePhase::Completed;
        ts
    })?;

    record_decision(cfg, task_id, &escalation.id, "approve")?;

    let task = store.load_task(task_id)?;
    let template = cfg.load_template(&task.template)?;
    runner::drive(cfg, project_dir, task_id, &template, None).await
}

pub async fn feedback(cfg: &Config, project_dir: &Path, task_id: &str, text: &str) -> Result<RunOutcome, CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let escalations = EscalationManager::new(&store);
    let escalation = pending_iteration_escalation(&escalations, task_id)?;
    escalations.resolve(task_id, &escalation.id, Decision::Revise { feedback: text.to_string() })?;

    store.update_state(task_id, |mut ts| {
        let ss = ts.stage_mut(&escalation.stage);
        ss.status = StagePhase::Pending;
        ss.iteration += 1;
        ss.review_feedback.push(text.to_string());
        ss
    })?;

    record_decision(cfg, task_id, &escalation.id, "revise")?;

    let task = store.load_task(task_id)?;
    let template = cfg.load_template(&task.template)?;
    runner::drive(cfg, project_dir, task_id, &template, None).await
}

pub async fn reject(cfg: &Config, task_id: &str) -> Result<(), CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let escalations = EscalationManager::new(&store);
    let escalation = pending_iteration_escalation(&escalations, task_id)?;
    escalations.resolve(task_id, &escalation.id, Decision::Reject)?;

    store.update_state(task_id, |mut ts| {
        ts.stage_mut(&escalation.stage).status = StagePhase::Failed;
        ts.status = TaskStatus::Refused;
        ts
    })?;

    record_decision(cfg, task_id, &escalation.id, "reject")?;

    let mut logger = crate::audit::AuditLogger::new(&cfg.audit_dir(task_id));
    logger.load_current()?;
    logger.append_event(crate::audit::AuditEvent::PipelineExit {
        reason: "rejected".to_string(),
        timestamp: chrono::Utc::now(),
    })?;
    logger.finish_run()?;
    Ok(())
}

fn record_decision(cfg: &Config, task_id: &str, escalation_id: &str, decision: &str) -> Result<(), CliError> {
    let mut logger = crate::audit::AuditLogger::new(&cfg.audit_dir(task_id));
    logger.load_current()?;
    logger.append_event(crate::audit::AuditEvent::UserDecision {
        escalation_id: escalation_id.to_string(),
        decision: decision.to_string(),
        timestamp: chrono::Utc::now(),
    })
}
