//! Replay support for the audit log: replaying recorded actions against a
//! playback LLM client, forking a new task from a past step, and comparing
//! two step sequences with an LCS-based aligner so divergence shows up as a
//! readable diff instead of a wall of unrelated lines.

use crate::state::StepRecord;

/// Rebuild the ordered list of steps a run should replay through, optionally
/// excluding everything after `up_to_step` — the basis for both
/// `replay --actions-only` and `fork --from-step`.
pub fn steps_up_to(steps: &[StepRecord], up_to_step: Option<u64>) -> Vec<StepRecord> {
    match up_to_step {
        None => steps.to_vec(),
        Some(limit) => steps.iter().filter(|s| s.step <= limit).cloned().collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOp {
    Same(StepRecord),
    Removed(StepRecord),
    Added(StepRecord),
}

/// Align two step sequences with a classic LCS-based diff, keyed on each
/// step's `(stage, summary)` pair so a step replayed at a different index
/// still lines up with its counterpart.
pub fn compare(left: &[StepRecord], right: &[StepRecord]) -> Vec<DiffOp> {
    let key = |s: &StepRecord| (s.stage.clone(), s.summary.clone());
    let n = left.len();
    let m = right.len();

    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if key(&left[i]) == key(&right[j]) {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if key(&left[i]) == key(&right[j]) {
            ops.push(DiffOp::Same(left[i].clone()));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push(DiffOp::Removed(left[i].clone()));
            i += 1;
        } else {
            ops.push(DiffOp::Added(right[j].clone()));
            j += 1;
        }
    }
    while i < n {
        ops.push(DiffOp::Removed(left[i].clone()));
        i += 1;
    }
    while j < m {
        ops.push(DiffOp::Added(right[j].clone()));
        j += 1;
    }
    ops
}
