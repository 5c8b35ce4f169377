use super::{AuditEvent, AuditRun};
use crate::errors::AuditError;
use std::fs;
use std::path::{Path, PathBuf};

pub struct AuditLogger {
    audit_dir: PathBuf,
    current_run: Option<AuditRun>,
    current_run_file: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_dir: &Path) -> Self {
        let current_run_file = audit_dir.join("current-run.json");
        Self {
            audit_dir: audit_dir.to_path_buf(),
            current_run: None,
            current_run_file,
        }
    }

    pub fn start_run(&mut self, task_id: &str) -> Result<(), AuditError> {
        self.current_run = Some(AuditRun::new(task_id));
        self.save_current()
    }

    /// Append an event to the current run. Errors rather than silently
    /// discarding the event when no run is active — a caller that forgot
    /// `start_run` should find out immediately, not lose data quietly.
    pub fn append_event(&mut self, event: AuditEvent) -> Result<(), AuditError> {
        let run = self.current_run.as_mut().ok_or(AuditError::NoActiveRun)?;
        run.events.push(event);
        self.save_current()
    }

    pub fn finish_run(&mut self) -> Result<PathBuf, AuditError> {
        let run = self.current_run.as_mut().ok_or(AuditError::NoActiveRun)?;
        run.finish();

        let filename = format!(
            "{}_{}.json",
            run.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.run_id.to_string()[..8]
        );
        let run_file = self.audit_dir.join("runs").join(&filename);
        if let Some(parent) = run_file.parent() {
            fs::create_dir_all(parent).map_err(|e| AuditError::WriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let json = serde_json::to_string_pretty(&run).map_err(AuditError::SerializeFailed)?;
        fs::write(&run_file, json).map_err(|e| AuditError::WriteFailed {
            path: run_file.clone(),
            source: e,
        })?;

        if self.current_run_file.exists() {
            fs::remove_file(&self.current_run_file).map_err(|e| AuditError::WriteFailed {
                path: self.current_run_file.clone(),
                source: e,
            })?;
        }

        self.current_run = None;
        Ok(run_file)
    }

    pub fn save_current(&self) -> Result<(), AuditError> {
        if let Some(ref run) = self.current_run {
            let json = serde_json::to_string_pretty(run).map_err(AuditError::SerializeFailed)?;
            fs::write(&self.current_run_file, json).map_err(|e| AuditError::WriteFailed {
                path: self.current_run_file.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn load_current(&mut self) -> Result<bool, AuditError> {
        if !self.current_run_file.exists() {
            return Ok(false);
        }
        let content = fs::read_to_string(&self.current_run_file).map_err(|e| AuditError::WriteFailed {
            path: self.current_run_file.clone(),
            source: e,
        })?;
        let run: AuditRun = serde_json::from_str(&content).map_err(AuditError::SerializeFailed)?;
        self.current_run = Some(run);
        Ok(true)
    }

    pub fn current_run(&self) -> Option<&AuditRun> {
        self.current_run.as_ref()
    }

    pub fn list_runs(&self) -> Result<Vec<PathBuf>, AuditError> {
        let runs_dir = self.audit_dir.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)
            .map_err(|e| AuditError::WriteFailed {
                path: runs_dir.clone(),
                source: e,
            })?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        runs.sort();
        runs.reverse();
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<AuditRun, AuditError> {
        let content = fs::read_to_string(path).map_err(|e| AuditError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(AuditError::SerializeFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup_logger() -> (AuditLogger, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        fs::create_dir_all(dir.path().join("runs")).expect("failed to create runs dir");
        let logger = AuditLogger::new(dir.path());
        (logger, dir)
    }

    fn step_event(step: u64) -> AuditEvent {
        AuditEvent::StepExecuted {
            step,
            stage: "implement".into(),
            summary: format!("step {step}"),
            success: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn append_event_without_active_run_errors() {
        let (mut logger, _dir) = setup_logger();
        let result = logger.append_event(step_event(1));
        assert!(matches!(result, Err(AuditError::NoActiveRun)));
    }

    #[test]
    fn start_run_creates_current_run_file() {
        let (mut logger, dir) = setup_logger();
        logger.start_run("t-1").unwrap();
        assert!(dir.path().join("current-run.json").exists());
    }

    #[test]
    fn finish_run_removes_current_run_file_and_writes_archive() {
        let (mut logger, dir) = setup_logger();
        logger.start_run("t-1").unwrap();
        logger.append_event(step_event(1)).unwrap();
        let run_path = logger.finish_run().unwrap();
        assert!(!dir.path().join("current-run.json").exists());
        assert!(run_path.exists());
    }

    #[test]
    fn events_persist_across_logger_instances() {
        let (mut logger, dir) = setup_logger();
        logger.start_run("t-1").unwrap();
        logger.append_event(step_event(1)).unwrap();
        logger.append_event(step_event(2)).unwrap();

        let mut second_logger = AuditLogger::new(dir.path());
        let loaded = second_logger.load_current().unwrap();
        assert!(loaded);
        assert_eq!(second_logger.current_run().unwrap().events.len(), 2);
    }

    #[test]
    fn list_runs_returns_most_recent_first() {
        let (mut logger, dir) = setup_logger();
        logger.start_run("t-1").unwrap();
        logger.finish_run().unwrap();

        let mut logger2 = AuditLogger::new(dir.path());
        logger2.start_run("t-2").unwrap();
        logger2.finish_run().unwrap();

        let runs = logger2.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
    }
}
