//! `replay <task_id> [--actions-only]` and `fork <task_id> --from-step N`.
//!
//! Both work off the recorded step log (`StateStore::load_steps`) via the
//! `audit::replay` primitives. A forked task's step log is reconstructed
//! faithfully up to the fork point; its per-stage status is copied from the
//! source task as of now, since state.yaml holds only the current snapshot
//! and not a history of past stage transitions.

use crate::audit::replay::steps_up_to;
use crate::cmd::CliError;
use crate::config::Config;
use crate::state::StateStore;
use serde_json::json;
use uuid::Uuid;

pub fn replay(cfg: &Config, task_id: &str, actions_only: bool) -> Result<(), CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let steps = store.load_steps(task_id)?;
    let steps = steps_up_to(&steps, None);
    let filtered: Vec<_> = if actions_only {
        steps.into_iter().filter(|s| s.action != "[]").collect()
    } else {
        steps
    };

    let payload: Vec<_> = filtered
        .iter()
        .map(|s| {
            json!({
                "step": s.step,
                "stage": s.stage,
                "agent_role": s.agent_role,
                "action": s.action,
                "success": s.success,
                "summary": s.summary,
                "timestamp": s.timestamp,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&payload).map_err(|e| CliError::Runtime(e.to_string()))?);
    Ok(())
}

pub fn fork(cfg: &Config, task_id: &str, from_step: u64) -> Result<String, CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let task = store.load_task(task_id)?;
    let state = store.load_state(task_id)?;
    let steps = store.load_steps(task_id)?;
    let truncated = steps_up_to(&steps, Some(from_step));

    let fork_id = format!("{task_id}-fork-{}", &Uuid::new_v4().to_string()[..8]);
    store.create_task(&fork_id, &task.request, &task.goal_type, &task.template, &task.entry_stage, &task.exit_stage)?;

    for step in truncated {
        store.append_step(&fork_id, step)?;
    }
    store.update_state(&fork_id, |_| state.clone())?;

    Ok(fork_id)
}
