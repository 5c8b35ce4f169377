//! Context assembly for each executor step (C5).
//!
//! Builds the bounded prompt handed to the LLM client out of fixed-budget
//! sections concatenated with `format!`, each with its own token budget and
//! a compression fallback instead of one unbounded dump.

use crate::errors::ContextError;
use crate::state::{StageState, Task, TaskState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Token budgets per section, in the order they are assembled.
pub struct TokenBudgets {
    pub system_prompt: usize,
    pub task_frame: usize,
    pub current_state: usize,
    pub recent_actions: usize,
    pub verification_status: usize,
    pub available_actions: usize,
}

impl Default for TokenBudgets {
    fn default() -> Self {
        Self {
            system_prompt: 1500,
            task_frame: 500,
            current_state: 4000,
            recent_actions: 1000,
            verification_status: 200,
            available_actions: 800,
        }
    }
}

/// A single remembered action, kept in a bounded FIFO buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryEntry {
    pub step: u64,
    pub summary: String,
    pub pinned: bool,
}

/// Bounded recent-action memory. Pinned entries survive eviction; unpinned
/// entries are dropped oldest-first once the buffer exceeds `capacity`.
#[derive(Debug, Clone)]
pub struct WorkingMemory {
    capacity: usize,
    entries: VecDeque<WorkingMemoryEntry>,
}

impl WorkingMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, entry: WorkingMemoryEntry) {
        self.entries.push_back(entry);
        self.evict_if_needed();
    }

    fn evict_if_needed(&mut self) {
        while self.entries.len() > self.capacity {
            if let Some(pos) = self.entries.iter().position(|e| !e.pinned) {
                self.entries.remove(pos);
            } else {
                break;
            }
        }
    }

    pub fn recent(&self) -> impl Iterator<Item = &WorkingMemoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deterministic, non-LLM summary of a verbose step outcome, used when a
/// section is over budget and must be compressed rather than truncated.
pub fn summarize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn token_estimate(text: &str) -> usize {
    // Heuristic: ~4 characters per token, matching common tokenizer ratios
    // for English prose and code.
    text.chars().count().div_ceil(4)
}

fn fit_section(name: &str, text: String, budget_tokens: usize) -> Result<String, ContextError> {
    let tokens = token_estimate(&text);
    if tokens <= budget_tokens {
        return Ok(text);
    }
    let compressed = summarize(&text, budget_tokens * 4);
    let compressed_tokens = token_estimate(&compressed);
    if compressed_tokens > budget_tokens {
        return Err(ContextError::BudgetExceeded {
            section: name.to_string(),
            actual: compressed_tokens,
            budget: budget_tokens,
        });
    }
    Ok(compressed)
}

pub struct ContextInputs<'a> {
    pub task: &'a Task,
    pub task_state: &'a TaskState,
    pub stage_state: &'a StageState,
    pub system_prompt: &'a str,
    pub working_memory: &'a WorkingMemory,
    pub available_actions: &'a [String],
}

/// The fully assembled prompt, ready to be handed to the LLM client.
pub struct AssembledContext {
    pub prompt: String,
    pub estimated_tokens: usize,
}

pub struct ContextBuilder {
    budgets: TokenBudgets,
}

impl ContextBuilder {
    pub fn new(budgets: TokenBudgets) -> Self {
        Self { budgets }
    }

    pub fn build(&self, inputs: &ContextInputs) -> Result<AssembledContext, ContextError> {
        let system_prompt = fit_section("system_prompt", inputs.system_prompt.to_string(), self.budgets.system_prompt)?;

        let task_frame = fit_section(
            "task_frame",
            format!(
                "## TASK\nid: {}\nrequest: {}\ngoal_type: {}",
                inputs.task.id, inputs.task.request, inputs.task.goal_type
            ),
            self.budgets.task_frame,
        )?;

        let current_state = fit_section(
            "current_state",
            format!(
                "## CURRENT STATE\nstage: {}\nphase: {:?}\niteration: {}",
                inputs.stage_state.stage, inputs.stage_state.status, inputs.stage_state.iteration
            ),
            self.budgets.current_state,
        )?;

        let recent_actions_text = inputs
            .working_memory
            .recent()
            .map(|e| format!("- [step {}] {}", e.step, e.summary))
            .collect::<Vec<_>>()
            .join("\n");
        let recent_actions = fit_section(
            "recent_actions",
            format!("## RECENT ACTIONS\n{recent_actions_text}"),
            self.budgets.recent_actions,
        )?;

        let feedback_text = if inputs.stage_state.review_feedback.is_empty() {
            "no prior feedback".to_string()
        } else {
            inputs.stage_state.review_feedback.join("; ")
        };
        let verification_status = fit_section(
            "verification_status",
            format!("## VERIFICATION STATUS\n{feedback_text}"),
            self.budgets.verification_status,
        )?;

        let available_actions = fit_section(
            "available_actions",
            format!("## AVAILABLE ACTIONS\n{}", inputs.available_actions.join(", ")),
            self.budgets.available_actions,
        )?;

        let prompt = format!(
            "{system_prompt}\n\n{task_frame}\n\n{current_state}\n\n{recent_actions}\n\n{verification_status}\n\n{available_actions}"
        );
        let estimated_tokens = token_estimate(&prompt);

        Ok(AssembledContext {
            prompt,
            estimated_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StagePhase;
    use chrono::Utc;

    fn fixtures() -> (Task, TaskState, StageState) {
        let task = Task {
            id: "t-1".into(),
            request: "Add OAuth2 login".into(),
            goal_type: "feature".into(),
            template: "default".into(),
            entry_stage: "design".into(),
            exit_stage: "done".into(),
            created_at: Utc::now(),
        };
        let task_state = TaskState::default();
        let stage_state = StageState {
            stage: "design".into(),
            status: StagePhase::Running,
            iteration: 1,
            artifact_hash: None,
            review_feedback: Vec::new(),
            updated_at: Utc::now(),
        };
        (task, task_state, stage_state)
    }

    #[test]
    fn working_memory_evicts_unpinned_entries_first() {
        let mut wm = WorkingMemory::new(2);
        wm.push(WorkingMemoryEntry {
            step: 1,
            summary: "a".into(),
            pinned: true,
        });
        wm.push(WorkingMemoryEntry {
            step: 2,
            summary: "b".into(),
            pinned: false,
        });
        wm.push(WorkingMemoryEntry {
            step: 3,
            summary: "c".into(),
            pinned: false,
        });
        assert_eq!(wm.len(), 2);
        assert!(wm.recent().any(|e| e.step == 1));
        assert!(wm.recent().any(|e| e.step == 3));
        assert!(!wm.recent().any(|e| e.step == 2));
    }

    #[test]
    fn summarize_leaves_short_text_untouched() {
        assert_eq!(summarize("short", 100), "short");
    }

    #[test]
    fn summarize_truncates_long_text_with_ellipsis() {
        let long = "x".repeat(200);
        let out = summarize(&long, 50);
        assert_eq!(out.chars().count(), 50);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn build_assembles_all_sections_within_budget() {
        let (task, _task_state, stage_state) = fixtures();
        let wm = WorkingMemory::new(10);
        let builder = ContextBuilder::new(TokenBudgets::default());
        let inputs = ContextInputs {
            task: &task,
            task_state: &TaskState::default(),
            stage_state: &stage_state,
            system_prompt: "You are a careful software engineer.",
            working_memory: &wm,
            available_actions: &["edit_file".to_string(), "run_tests".to_string()],
        };
        let result = builder.build(&inputs).unwrap();
        assert!(result.prompt.contains("Add OAuth2 login"));
        assert!(result.prompt.contains("edit_file"));
    }

    #[test]
    fn build_compresses_oversized_section_instead_of_failing() {
        let (task, _task_state, stage_state) = fixtures();
        let wm = WorkingMemory::new(10);
        let budgets = TokenBudgets {
            system_prompt: 5,
            ..TokenBudgets::default()
        };
        let builder = ContextBuilder::new(budgets);
        let inputs = ContextInputs {
            task: &task,
            task_state: &TaskState::default(),
            stage_state: &stage_state,
            system_prompt: &"word ".repeat(100),
            working_memory: &wm,
            available_actions: &[],
        };
        let result = builder.build(&inputs).unwrap();
        assert!(result.prompt.contains('…'));
    }
}
