//! Durable, crash-safe task state (C1).
//!
//! Layout per task, rooted at `{root}/{task_id}/`:
//! ```text
//! task.yaml            immutable task identity
//! state.yaml           current stage pointer + per-stage state
//! actions.log          append-only step records (one YAML doc per line)
//! working_memory.yaml  rolling context buffer (see crate::context)
//! artifacts/{stage}/   content-addressed artifact blobs
//! escalations/{id}.yaml
//! .lock                advisory exclusive lock for single-writer enforcement
//! ```
//!
//! All mutation goes through temp-file-then-rename so a crash mid-write
//! leaves the previous version intact. A single writer per task is enforced
//! with an exclusive file lock around the read-modify-write in `update_state`.

mod lock;

use crate::errors::StateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub use lock::TaskLock;

/// Immutable task identity, written once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub request: String,
    pub goal_type: String,
    pub template: String,
    pub entry_stage: String,
    pub exit_stage: String,
    pub created_at: DateTime<Utc>,
}

/// Mutable pipeline/stage pointers and per-stage state, one per task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskState {
    pub current_stage: Option<String>,
    pub stages: Vec<StageState>,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Running,
    Completed,
    Escalated,
    Failed,
    Refused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageState {
    pub stage: String,
    pub status: StagePhase,
    pub iteration: u32,
    pub artifact_hash: Option<String>,
    pub review_feedback: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    Pending,
    Running,
    Iterating,
    Reviewing,
    Approved,
    Completed,
    Escalated,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn stage_mut(&mut self, stage: &str) -> &mut StageState {
        if let Some(idx) = self.stages.iter().position(|s| s.stage == stage) {
            return &mut self.stages[idx];
        }
        self.stages.push(StageState {
            stage: stage.to_string(),
            status: StagePhase::Pending,
            iteration: 0,
            artifact_hash: None,
            review_feedback: Vec::new(),
            updated_at: Utc::now(),
        });
        self.stages.last_mut().unwrap()
    }

    pub fn stage(&self, stage: &str) -> Option<&StageState> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// One append-only audit/action entry. See `crate::audit` for the richer
/// event-typed record this is embedded alongside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u64,
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub agent_role: String,
    pub action: String,
    pub success: bool,
    pub summary: String,
}

/// Canonical store rooted at a configurable directory (`AGENTFORGE_ROOT` or
/// an explicit path).
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    pub fn create_task(
        &self,
        id: &str,
        request: &str,
        goal_type: &str,
        template: &str,
        entry_stage: &str,
        exit_stage: &str,
    ) -> Result<Task, StateError> {
        let dir = self.task_dir(id);
        if dir.exists() {
            return Err(StateError::TaskAlreadyExists(id.to_string()));
        }
        fs::create_dir_all(dir.join("artifacts")).map_err(|e| StateError::WriteFailed {
            path: dir.clone(),
            source: e,
        })?;
        fs::create_dir_all(dir.join("escalations")).map_err(|e| StateError::WriteFailed {
            path: dir.clone(),
            source: e,
        })?;

        let task = Task {
            id: id.to_string(),
            request: request.to_string(),
            goal_type: goal_type.to_string(),
            template: template.to_string(),
            entry_stage: entry_stage.to_string(),
            exit_stage: exit_stage.to_string(),
            created_at: Utc::now(),
        };
        write_yaml_atomic(&dir.join("task.yaml"), &task)?;
        write_yaml_atomic(&dir.join("state.yaml"), &TaskState::default())?;
        Ok(task)
    }

    pub fn load_task(&self, id: &str) -> Result<Task, StateError> {
        read_yaml(&self.task_dir(id).join("task.yaml"))
    }

    pub fn load_state(&self, id: &str) -> Result<TaskState, StateError> {
        let path = self.task_dir(id).join("state.yaml");
        if !path.exists() {
            return Ok(TaskState::default());
        }
        read_yaml(&path)
    }

    pub fn list_tasks(&self) -> Result<Vec<String>, StateError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = fs::read_dir(&self.root)
            .map_err(|e| StateError::ReadFailed {
                path: self.root.clone(),
                source: e,
            })?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Read-modify-write under the task's exclusive lock. The closure sees
    /// the current state and returns the new state to persist.
    pub fn update_state<F>(&self, task_id: &str, mutator: F) -> Result<TaskState, StateError>
    where
        F: FnOnce(TaskState) -> TaskState,
    {
        let dir = self.task_dir(task_id);
        if !dir.exists() {
            return Err(StateError::TaskNotFound(task_id.to_string()));
        }
        let _lock = TaskLock::acquire(&dir)?;
        let current = self.load_state(task_id)?;
        let next = mutator(current);
        write_yaml_atomic(&dir.join("state.yaml"), &next)?;
        Ok(next)
    }

    /// Append a step record. Returns the record with its assigned step index.
    pub fn append_step(
        &self,
        task_id: &str,
        mut record: StepRecord,
    ) -> Result<StepRecord, StateError> {
        let dir = self.task_dir(task_id);
        let _lock = TaskLock::acquire(&dir)?;
        let log_path = dir.join("actions.log");
        let next_step = last_step(&log_path)?.map(|s| s + 1).unwrap_or(1);
        record.step = next_step;
        let line = serde_yaml::to_string(&record)
            .map_err(|e| StateError::Corrupted {
                path: log_path.clone(),
                reason: e.to_string(),
            })?
            .replace("\n", "\n  ");
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| StateError::WriteFailed {
                path: log_path.clone(),
                source: e,
            })?;
        writeln!(f, "---\n{}", line.trim_end()).map_err(|e| StateError::WriteFailed {
            path: log_path,
            source: e,
        })?;
        Ok(record)
    }

    pub fn load_steps(&self, task_id: &str) -> Result<Vec<StepRecord>, StateError> {
        let path = self.task_dir(task_id).join("actions.log");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| StateError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;
        let mut out = Vec::new();
        for doc in content.split("---").map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let record: StepRecord = serde_yaml::from_str(doc).map_err(|e| StateError::Corrupted {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            out.push(record);
        }
        Ok(out)
    }

    /// Save a content-addressed artifact; idempotent on duplicate bytes.
    pub fn save_artifact(&self, task_id: &str, stage: &str, bytes: &[u8]) -> Result<String, StateError> {
        let hash = hash_bytes(bytes);
        let dir = self.task_dir(task_id).join("artifacts").join(stage);
        fs::create_dir_all(&dir).map_err(|e| StateError::WriteFailed {
            path: dir.clone(),
            source: e,
        })?;
        let path = dir.join(format!("{hash}.blob"));
        if !path.exists() {
            write_atomic(&path, bytes)?;
        }
        Ok(hash)
    }

    pub fn load_artifact(&self, task_id: &str, stage: &str, hash: &str) -> Result<Vec<u8>, StateError> {
        let path = self
            .task_dir(task_id)
            .join("artifacts")
            .join(stage)
            .join(format!("{hash}.blob"));
        fs::read(&path).map_err(|e| StateError::ReadFailed { path, source: e })
    }

    /// Persist one escalation record, identified by its own id, under
    /// `escalations/{id}.yaml`. Overwrites in place so resolution can be
    /// written back to the same file it was raised in.
    pub fn save_escalation<T: Serialize>(&self, escalation: &T) -> Result<(), StateError>
    where
        T: EscalationLike,
    {
        let dir = self.task_dir(escalation.task_id()).join("escalations");
        fs::create_dir_all(&dir).map_err(|e| StateError::WriteFailed {
            path: dir.clone(),
            source: e,
        })?;
        write_yaml_atomic(&dir.join(format!("{}.yaml", escalation.id())), escalation)
    }

    pub fn load_escalation<T: for<'de> Deserialize<'de>>(&self, task_id: &str, escalation_id: &str) -> Result<T, StateError> {
        let path = self
            .task_dir(task_id)
            .join("escalations")
            .join(format!("{escalation_id}.yaml"));
        read_yaml(&path)
    }

    pub fn load_escalations<T: for<'de> Deserialize<'de>>(&self, task_id: &str) -> Result<Vec<T>, StateError> {
        let dir = self.task_dir(task_id).join("escalations");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StateError::ReadFailed {
            path: dir.clone(),
            source: e,
        })? {
            let entry = entry.map_err(|e| StateError::ReadFailed {
                path: dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                out.push(read_yaml(&path)?);
            }
        }
        Ok(out)
    }
}

/// Lets `save_escalation` address a record's storage location without the
/// state store depending on the escalation manager's concrete type.
pub trait EscalationLike {
    fn task_id(&self) -> &str;
    fn id(&self) -> &str;
}

fn last_step(log_path: &Path) -> Result<Option<u64>, StateError> {
    if !log_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(log_path).map_err(|e| StateError::ReadFailed {
        path: log_path.to_path_buf(),
        source: e,
    })?;
    let mut last = None;
    for doc in content.split("---").map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Ok(record) = serde_yaml::from_str::<StepRecord>(doc) {
            last = Some(record.step);
        }
    }
    Ok(last)
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_yaml_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StateError> {
    let content = serde_yaml::to_string(value).map_err(|e| StateError::Corrupted {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    write_atomic(path, content.as_bytes())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StateError::WriteFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    fs::write(&tmp, bytes).map_err(|e| StateError::WriteFailed {
        path: tmp.clone(),
        source: e,
    })?;
    fs::rename(&tmp, path).map_err(|e| StateError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StateError> {
    let content = fs::read_to_string(path).map_err(|e| StateError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_yaml::from_str(&content).map_err(|e| StateError::Corrupted {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_load_task_round_trips() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .create_task("t-1", "add oauth2", "implement_feature", "default", "intake", "deliver")
            .unwrap();
        let task = store.load_task("t-1").unwrap();
        assert_eq!(task.request, "add oauth2");
        let state = store.load_state("t-1").unwrap();
        assert_eq!(state.status, TaskStatus::Running);
    }

    #[test]
    fn create_task_twice_fails() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.create_task("t-1", "x", "y", "z", "a", "b").unwrap();
        let result = store.create_task("t-1", "x", "y", "z", "a", "b");
        assert!(matches!(result, Err(StateError::TaskAlreadyExists(_))));
    }

    #[test]
    fn update_state_persists_mutation() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.create_task("t-1", "x", "y", "z", "a", "b").unwrap();
        store
            .update_state("t-1", |mut s| {
                s.current_stage = Some("spec".into());
                s.stage_mut("spec").status = StagePhase::Running;
                s
            })
            .unwrap();
        let reloaded = store.load_state("t-1").unwrap();
        assert_eq!(reloaded.current_stage.as_deref(), Some("spec"));
        assert_eq!(reloaded.stage("spec").unwrap().status, StagePhase::Running);
    }

    #[test]
    fn append_step_assigns_contiguous_indices() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.create_task("t-1", "x", "y", "z", "a", "b").unwrap();
        for i in 0..3 {
            let record = StepRecord {
                step: 0,
                timestamp: Utc::now(),
                stage: "spec".into(),
                agent_role: "specifier".into(),
                action: format!("step {i}"),
                success: true,
                summary: "ok".into(),
            };
            store.append_step("t-1", record).unwrap();
        }
        let steps = store.load_steps("t-1").unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps.iter().map(|s| s.step).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn save_artifact_is_idempotent_on_duplicate_bytes() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.create_task("t-1", "x", "y", "z", "a", "b").unwrap();
        let h1 = store.save_artifact("t-1", "spec", b"hello").unwrap();
        let h2 = store.save_artifact("t-1", "spec", b"hello").unwrap();
        assert_eq!(h1, h2);
        let loaded = store.load_artifact("t-1", "spec", &h1).unwrap();
        assert_eq!(loaded, b"hello");
    }

    #[test]
    fn update_state_on_missing_task_fails() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let result = store.update_state("ghost", |s| s);
        assert!(matches!(result, Err(StateError::TaskNotFound(_))));
    }
}
