//! `start`, `design`, `implement`, `test`, `fix`, and `continue` — every
//! command that drives the pipeline controller/stage executor loop in
//! [`crate::cmd::runner`].

use crate::cmd::runner::{self, RunOutcome};
use crate::cmd::CliError;
use crate::config::Config;
use crate::contracts::{FieldSpec, FieldType, SchemaShape};
use crate::pipeline::fingerprint::fingerprint;
use crate::pipeline::{PipelineController, PipelineTemplate, StageDef};
use crate::state::{StagePhase, StateStore};
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn new_task_id(prefix: &str) -> String {
    format!("{prefix}-{}", &Uuid::new_v4().to_string()[..8])
}

pub async fn start(cfg: &Config, project_dir: &Path, request: &str) -> Result<(String, RunOutcome), CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let template = cfg.load_template("default")?;
    let task_id = new_task_id("task");
    runner::seed_task(&store, &task_id, request, "feature", &template)?;
    let outcome = runner::drive(cfg, project_dir, &task_id, &template, None).await?;
    Ok((task_id, outcome))
}

pub async fn design(cfg: &Config, project_dir: &Path, request: &str) -> Result<(String, RunOutcome), CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let template = cfg.load_template("default")?;
    let task_id = new_task_id("task");
    runner::seed_task(&store, &task_id, request, "feature", &template)?;
    let outcome = runner::drive(cfg, project_dir, &task_id, &template, Some("design")).await?;
    Ok((task_id, outcome))
}

pub async fn implement(
    cfg: &Config,
    project_dir: &Path,
    request: &str,
    from_spec: Option<PathBuf>,
    from_task: Option<String>,
) -> Result<(String, RunOutcome), CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let contracts = cfg.load_contracts()?;
    let template = cfg.load_template("default")?;
    let task_id = new_task_id("task");

    if let Some(spec_path) = from_spec {
        if !spec_path.exists() {
            return Err(CliError::MissingInput(format!(
                "--from-spec path {} does not exist",
                spec_path.display()
            )));
        }
        let content = std::fs::read_to_string(&spec_path).map_err(|e| CliError::Runtime(e.to_string()))?;
        let imported: serde_json::Value = serde_json::from_str(&content).map_err(|e| CliError::Runtime(e.to_string()))?;
        let artifact = imported.get("artifact").cloned().ok_or_else(|| {
            CliError::MissingInput(format!("{} has no 'artifact' field", spec_path.display()))
        })?;
        let recorded_fingerprint = imported
            .get("fingerprint")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CliError::MissingInput(format!("{} has no 'fingerprint' field", spec_path.display())))?;
        let current_fingerprint = fingerprint(&read_tree(project_dir)?);

        let controller = PipelineController::new(&contracts);
        controller.admit_external_artifact(&artifact, "design-doc", recorded_fingerprint, &current_fingerprint)?;

        runner::seed_task(&store, &task_id, request, "feature", &template)?;
        let bytes = serde_json::to_vec(&artifact).map_err(|e| CliError::Runtime(e.to_string()))?;
        let hash = store.save_artifact(&task_id, "design", &bytes)?;
        store.update_state(&task_id, |mut ts| {
            let ss = ts.stage_mut("design");
            ss.status = StagePhase::Completed;
            ss.artifact_hash = Some(hash.clone());
            ts
        })?;
    } else if let Some(source_task) = from_task {
        let source_state = store.load_state(&source_task)?;
        let design_stage = source_state
            .stage("design")
            .filter(|s| s.status == StagePhase::Completed)
            .cloned()
            .ok_or_else(|| CliError::MissingInput(format!("task {source_task} has no completed 'design' stage to import")))?;
        runner::seed_task(&store, &task_id, request, "feature", &template)?;
        if let Some(hash) = &design_stage.artifact_hash {
            let bytes = store.load_artifact(&source_task, "design", hash)?;
            store.save_artifact(&task_id, "design", &bytes)?;
        }
        store.update_state(&task_id, |mut ts| {
            let ss = ts.stage_mut("design");
            *ss = design_stage.clone();
            ts
        })?;
    } else {
        runner::seed_task(&store, &task_id, request, "feature", &template)?;
    }

    let outcome = runner::drive(cfg, project_dir, &task_id, &template, Some("implement")).await?;
    Ok((task_id, outcome))
}

pub async fn test(cfg: &Config, project_dir: &Path, spec_path: &Path) -> Result<(String, RunOutcome), CliError> {
    if !spec_path.exists() {
        return Err(CliError::MissingInput(format!("--spec path {} does not exist", spec_path.display())));
    }
    let spec_content = std::fs::read_to_string(spec_path).map_err(|e| CliError::Runtime(e.to_string()))?;
    let store = StateStore::new(cfg.tasks_root());
    let template = PipelineTemplate {
        name: "test-only".to_string(),
        stages: vec![StageDef {
            name: "test".to_string(),
            depends_on: vec![],
            step_budget: 15,
            output_contract: "test-report".to_string(),
            review_specialists: vec![],
            max_review_rounds: 1,
            supervised: false,
        }],
    };
    let task_id = new_task_id("test");
    let request = format!("Write tests for the following specification:\n\n{spec_content}");
    runner::seed_task(&store, &task_id, &request, "test_authoring", &template)?;
    let outcome = runner::drive(cfg, project_dir, &task_id, &template, None).await?;
    Ok((task_id, outcome))
}

pub async fn fix(cfg: &Config, project_dir: &Path, violation_id: &str) -> Result<(String, RunOutcome), CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let template = PipelineTemplate {
        name: "fix".to_string(),
        stages: vec![
            StageDef {
                name: "analyze".to_string(),
                depends_on: vec![],
                step_budget: 8,
                output_contract: "violation-analysis".to_string(),
                review_specialists: vec![],
                max_review_rounds: 1,
                supervised: false,
            },
            StageDef {
                name: "implement".to_string(),
                depends_on: vec!["analyze".to_string()],
                step_budget: 20,
                output_contract: "code-change".to_string(),
                review_specialists: vec![],
                max_review_rounds: 3,
                supervised: false,
            },
        ],
    };
    let task_id = new_task_id("fix");
    let request = format!("Fix conformance violation {violation_id}");
    runner::seed_task(&store, &task_id, &request, "fix_violation", &template)?;
    let outcome = runner::drive(cfg, project_dir, &task_id, &template, None).await?;
    Ok((task_id, outcome))
}

pub async fn continue_task(
    cfg: &Config,
    project_dir: &Path,
    task_id: &str,
    extend_to: Option<&str>,
    revise: bool,
) -> Result<RunOutcome, CliError> {
    let store = StateStore::new(cfg.tasks_root());
    let task = store.load_task(task_id)?;
    let template = cfg.load_template(&task.template)?;

    if revise {
        let task_state = store.load_state(task_id)?;
        if let Some(stage) = task_state.current_stage.clone() {
            store.update_state(task_id, |mut ts| {
                let ss = ts.stage_mut(&stage);
                ss.status = StagePhase::Pending;
                ts
            })?;
        }
    }

    runner::drive(cfg, project_dir, task_id, &template, extend_to).await
}

/// Reads every file under `dir` into the `(path, bytes)` pairs
/// `pipeline::fingerprint::fingerprint` expects, skipping the agentforge
/// state root itself if it happens to live inside the project tree.
fn read_tree(dir: &Path) -> Result<Vec<(String, Vec<u8>)>, CliError> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        if rel.starts_with(".agentforge") || rel.starts_with(".git") {
            continue;
        }
        let bytes = std::fs::read(entry.path()).map_err(|e| CliError::Runtime(e.to_string()))?;
        out.push((rel, bytes));
    }
    Ok(out)
}

/// Contract shapes `implement --from-spec`/`fix` rely on beyond the three
/// the default template already seeds.
pub fn violation_analysis_contract() -> crate::contracts::Contract {
    crate::contracts::Contract {
        name: "violation-analysis".to_string(),
        schema: SchemaShape {
            required_fields: vec![
                FieldSpec {
                    name: "root_cause".to_string(),
                    ty: FieldType::String,
                },
                FieldSpec {
                    name: "fix_plan".to_string(),
                    ty: FieldType::String,
                },
            ],
        },
        validation: vec![],
    }
}

/// Seeds `violation-analysis` into a freshly loaded contract registry;
/// called wherever `fix` needs it but [`Config::load_contracts`] only seeds
/// the default template's three.
pub fn ensure_fix_contracts(cfg: &Config) -> Result<(), CliError> {
    let path = cfg.contracts_dir.join("violation-analysis.yaml");
    if path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(&cfg.contracts_dir).map_err(|e| CliError::Runtime(e.to_string()))?;
    let yaml = serde_yaml::to_string(&violation_analysis_contract()).map_err(|e| CliError::Runtime(e.to_string()))?;
    std::fs::write(&path, yaml).map_err(|e| CliError::Runtime(e.to_string()))?;
    Ok(())
}
