//! `resolve <escalation_id> "<text>"` — the generic resolution path for
//! escalations other than the supervised-stage iteration decision (those go
//! through `feedback`/`approve`/`reject` in [`crate::cmd::iteration`]):
//! step-budget exhaustion, blocking review rounds, and stale external
//! artifacts.

use crate::cmd::CliError;
use crate::config::Config;
use crate::escalation::{Decision, Escalation, EscalationManager};
use crate::state::{StagePhase, StateStore, TaskStatus};

/// A free-text resolution is interpreted as a decision keyword when it
/// matches one exactly (case-insensitively), `extend:<stage>` to jump the
/// pipeline forward, and otherwise as revision guidance to feed back into
/// the escalated stage.
fn parse_decision(text: &str) -> Decision {
    let trimmed = text.trim();
    match trimmed.to_lowercase().as_str() {
        "approve" => Decision::Approve,
        "reject" => Decision::Reject,
        "exit" => Decision::Exit,
        _ => {
            if let Some(stage) = trimmed.strip_prefix("extend:") {
                Decision::Extend { to_stage: stage.trim().to_string() }
            } else {
                Decision::Revise { feedback: trimmed.to_string() }
            }
        }
    }
}

fn find_owning_task(store: &StateStore, escalation_id: &str) -> Result<(String, Escalation), CliError> {
    for task_id in store.list_tasks()? {
        let escalations = EscalationManager::new(store);
        if let Some(escalation) = escalations.pending(&task_id)?.into_iter().find(|e| e.id == escalation_id) {
            return Ok((task_id, escalation));
        }
    }
    Err(CliError::MissingInput(format!("no pending escalation with id {escalation_id}")))
}

pub async fn resolve(cfg: &Config, escalation_id: &str, text: &str) -> Result<(), CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let (task_id, escalation) = find_owning_task(&store, escalation_id)?;
    let escalations = EscalationManager::new(&store);
    let decision = parse_decision(text);
    escalations.resolve(&task_id, escalation_id, decision.clone())?;

    store.update_state(&task_id, |mut ts| {
        match &decision {
            Decision::Reject | Decision::Exit => {
                ts.stage_mut(&escalation.stage).status = StagePhase::Failed;
                ts.status = TaskStatus::Refused;
            }
            _ => {
                ts.stage_mut(&escalation.stage).status = StagePhase::Pending;
                ts.status = TaskStatus::Running;
            }
        }
        ts
    })?;

    let mut logger = crate::audit::AuditLogger::new(&cfg.audit_dir(&task_id));
    logger.load_current()?;
    logger.append_event(crate::audit::AuditEvent::UserDecision {
        escalation_id: escalation_id.to_string(),
        decision: text.trim().to_string(),
        timestamp: chrono::Utc::now(),
    })?;
    Ok(())
}
