//! Event-typed audit log (C11).
//!
//! Event vocabulary covers stage transitions, presented iterations, user
//! decisions on escalations, imported external artifacts, review verdicts,
//! and pipeline exits, persisted as current-run.json +
//! runs/{timestamp}_{uuid8}.json with a "never silently drop an event"
//! discipline.

pub mod logger;
pub mod replay;

pub use logger::AuditLogger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub run_id: Uuid,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub events: Vec<AuditEvent>,
}

impl AuditRun {
    pub fn new(task_id: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            events: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.ended_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    StepExecuted {
        step: u64,
        stage: String,
        summary: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    StageTransition {
        from_stage: Option<String>,
        to_stage: String,
        timestamp: DateTime<Utc>,
    },
    IterationPresented {
        stage: String,
        iteration: u32,
        artifact_hash: String,
        timestamp: DateTime<Utc>,
    },
    UserDecision {
        escalation_id: String,
        decision: String,
        timestamp: DateTime<Utc>,
    },
    ExternalArtifactImported {
        stage: String,
        source: PathBuf,
        artifact_hash: String,
        timestamp: DateTime<Utc>,
    },
    ReviewVerdict {
        stage: String,
        specialist: String,
        gating: bool,
        passed: bool,
        timestamp: DateTime<Utc>,
    },
    PipelineExit {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditEvent::StepExecuted { timestamp, .. }
            | AuditEvent::StageTransition { timestamp, .. }
            | AuditEvent::IterationPresented { timestamp, .. }
            | AuditEvent::UserDecision { timestamp, .. }
            | AuditEvent::ExternalArtifactImported { timestamp, .. }
            | AuditEvent::ReviewVerdict { timestamp, .. }
            | AuditEvent::PipelineExit { timestamp, .. } => *timestamp,
        }
    }
}
