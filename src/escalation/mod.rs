//! Escalation manager (C10).
//!
//! Escalations are persisted records rather than a synchronous blocking
//! prompt: raising one suspends the task (the pipeline controller stops
//! driving it), and resolution happens out of band — a later `resolve` CLI
//! invocation, a reviewing human, or an autonomous policy — by writing a
//! decision back into the same record.

use crate::errors::EscalationError;
use crate::state::StateStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    ReviewBlocking,
    StepBudgetExhausted,
    ContractViolation,
    ExternalArtifactStale,
    ToolPolicyViolation,
    Requested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Revise { feedback: String },
    Reject,
    Exit,
    Extend { to_stage: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: String,
    pub task_id: String,
    pub stage: String,
    pub reason: EscalationReason,
    pub detail: String,
    pub raised_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub decision: Option<Decision>,
}

impl Escalation {
    pub fn is_pending(&self) -> bool {
        self.decision.is_none()
    }
}

impl crate::state::EscalationLike for Escalation {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn id(&self) -> &str {
        &self.id
    }
}

pub struct EscalationManager<'a> {
    state: &'a StateStore,
}

impl<'a> EscalationManager<'a> {
    pub fn new(state: &'a StateStore) -> Self {
        Self { state }
    }

    pub fn raise(
        &self,
        task_id: &str,
        stage: &str,
        reason: EscalationReason,
        detail: &str,
    ) -> Result<Escalation, EscalationError> {
        let escalation = Escalation {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            stage: stage.to_string(),
            reason,
            detail: detail.to_string(),
            raised_at: Utc::now(),
            resolved_at: None,
            decision: None,
        };
        self.state.save_escalation(&escalation)?;
        Ok(escalation)
    }

    pub fn pending(&self, task_id: &str) -> Result<Vec<Escalation>, EscalationError> {
        Ok(self
            .state
            .load_escalations(task_id)?
            .into_iter()
            .filter(Escalation::is_pending)
            .collect())
    }

    pub fn resolve(&self, task_id: &str, escalation_id: &str, decision: Decision) -> Result<Escalation, EscalationError> {
        let mut escalation = self
            .state
            .load_escalation(task_id, escalation_id)
            .map_err(|_| EscalationError::NotFound(escalation_id.to_string()))?;
        if escalation.decision.is_some() {
            return Err(EscalationError::AlreadyResolved(escalation_id.to_string()));
        }
        escalation.decision = Some(decision);
        escalation.resolved_at = Some(Utc::now());
        self.state.save_escalation(&escalation)?;
        Ok(escalation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_with_task(id: &str) -> (tempfile::TempDir, StateStore) {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store.create_task(id, "x", "feature", "default", "design", "done").unwrap();
        (dir, store)
    }

    #[test]
    fn raise_then_pending_lists_the_escalation() {
        let (_dir, store) = store_with_task("t-1");
        let manager = EscalationManager::new(&store);
        let escalation = manager
            .raise("t-1", "implement", EscalationReason::ReviewBlocking, "3 blocking findings")
            .unwrap();
        let pending = manager.pending("t-1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, escalation.id);
    }

    #[test]
    fn resolve_removes_escalation_from_pending() {
        let (_dir, store) = store_with_task("t-1");
        let manager = EscalationManager::new(&store);
        let escalation = manager
            .raise("t-1", "implement", EscalationReason::StepBudgetExhausted, "ran out of steps")
            .unwrap();
        manager
            .resolve("t-1", &escalation.id, Decision::Extend { to_stage: "review".into() })
            .unwrap();
        let pending = manager.pending("t-1").unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn resolve_twice_errors() {
        let (_dir, store) = store_with_task("t-1");
        let manager = EscalationManager::new(&store);
        let escalation = manager
            .raise("t-1", "implement", EscalationReason::Requested, "manual check-in")
            .unwrap();
        manager.resolve("t-1", &escalation.id, Decision::Approve).unwrap();
        let result = manager.resolve("t-1", &escalation.id, Decision::Reject);
        assert!(matches!(result, Err(EscalationError::AlreadyResolved(_))));
    }

    #[test]
    fn resolve_unknown_escalation_errors() {
        let (_dir, store) = store_with_task("t-1");
        let manager = EscalationManager::new(&store);
        let result = manager.resolve("t-1", "nonexistent", Decision::Approve);
        assert!(matches!(result, Err(EscalationError::NotFound(_))));
    }
}
