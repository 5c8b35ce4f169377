//! `status [--watch] [<task_id>]` — dashboard data as plain text or JSON.

use crate::cmd::CliError;
use crate::config::Config;
use crate::escalation::EscalationManager;
use crate::state::StateStore;
use serde_json::json;

pub async fn run(cfg: &Config, task_id: Option<String>, watch: bool, json_output: bool) -> Result<(), CliError> {
    if watch {
        loop {
            print_once(cfg, task_id.as_deref(), json_output)?;
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                _ = tokio::signal::ctrl_c() => return Ok(()),
            }
        }
    }
    print_once(cfg, task_id.as_deref(), json_output)
}

fn print_once(cfg: &Config, task_id: Option<&str>, json_output: bool) -> Result<(), CliError> {
    let store = StateStore::new(cfg.tasks_root());
    match task_id {
        Some(id) => print_task(&store, id, json_output),
        None => print_dashboard(&store, json_output),
    }
}

fn print_task(store: &StateStore, task_id: &str, json_output: bool) -> Result<(), CliError> {
    let task = store.load_task(task_id)?;
    let state = store.load_state(task_id)?;
    let escalations = EscalationManager::new(store);
    let pending = escalations.pending(task_id)?;

    if json_output {
        let payload = json!({
            "task_id": task.id,
            "request": task.request,
            "status": state.status,
            "current_stage": state.current_stage,
            "stages": state.stages,
            "pending_escalations": pending,
        });
        println!("{}", serde_json::to_string_pretty(&payload).map_err(|e| CliError::Runtime(e.to_string()))?);
        return Ok(());
    }

    println!();
    println!("Task {}", task.id);
    println!("========{}", "=".repeat(task.id.len()));
    println!();
    println!("Request:       {}", task.request);
    println!("Template:      {}", task.template);
    println!("Status:        {:?}", state.status);
    println!("Current stage: {}", state.current_stage.as_deref().unwrap_or("-"));
    println!();
    println!("Stages:");
    for stage in &state.stages {
        println!(
            "  {:<12} {:?} (iteration {}, artifact {})",
            stage.stage,
            stage.status,
            stage.iteration,
            stage.artifact_hash.as_deref().unwrap_or("-")
        );
    }
    if !pending.is_empty() {
        println!();
        println!("Pending escalations:");
        for esc in &pending {
            println!("  {} [{:?}] {} - {}", esc.id, esc.reason, esc.stage, esc.detail);
        }
    }
    println!();
    Ok(())
}

fn print_dashboard(store: &StateStore, json_output: bool) -> Result<(), CliError> {
    let task_ids = store.list_tasks()?;

    if json_output {
        let mut rows = Vec::new();
        for id in &task_ids {
            let state = store.load_state(id)?;
            rows.push(json!({
                "task_id": id,
                "status": state.status,
                "current_stage": state.current_stage,
            }));
        }
        println!("{}", serde_json::to_string_pretty(&rows).map_err(|e| CliError::Runtime(e.to_string()))?);
        return Ok(());
    }

    println!();
    println!("Tasks");
    println!("=====");
    println!();
    if task_ids.is_empty() {
        println!("No tasks yet. Run 'agentforge start \"<request>\"' to launch one.");
        println!();
        return Ok(());
    }
    for id in &task_ids {
        let state = store.load_state(id)?;
        println!("  {:<24} {:?} (stage: {})", id, state.status, state.current_stage.as_deref().unwrap_or("-"));
    }
    println!();
    Ok(())
}
