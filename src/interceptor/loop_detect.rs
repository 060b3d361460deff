//! Unproductive-loop detection.
//!
//! Five detectors, consulted in priority order. Output-signature loops
//! catch an agent rereading the same failure; the severe variant runs
//! only in VERIFY where repetitive reruns are expected and only a total
//! collapse counts. Stagnation is the single wall-clock check in the
//! crate.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::state::Phase;

use super::history::{ExecutionHistory, OutputHistory};

/// Wall-clock gap after which a task counts as stagnant.
pub const STAGNATION_MS: i64 = 5 * 60 * 1000;

/// Window for the standard output-loop detector.
const OUTPUT_LOOP_WINDOW: usize = 10;
/// Minimum signature length the standard detector considers.
const OUTPUT_LOOP_MIN_LEN: usize = 80;
/// Maximum distinct signatures for the standard detector to fire.
const OUTPUT_LOOP_MAX_DISTINCT: usize = 2;

/// Window for the severe (VERIFY-only) detector.
const SEVERE_LOOP_WINDOW: usize = 12;
/// Minimum signature length the severe detector considers.
const SEVERE_LOOP_MIN_LEN: usize = 200;
/// Maximum distinct signatures for the severe detector to fire.
const SEVERE_LOOP_MAX_DISTINCT: usize = 1;

/// Identical records required for the repeat detectors.
const REPEAT_THRESHOLD: usize = 3;

/// Which detector fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    OutputLoop,
    SevereOutputLoop,
    Stagnation,
    RepeatedFailure,
    RepeatedCommand,
}

impl std::fmt::Display for LoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutputLoop => write!(f, "output_loop"),
            Self::SevereOutputLoop => write!(f, "severe_output_loop"),
            Self::Stagnation => write!(f, "stagnation"),
            Self::RepeatedFailure => write!(f, "repeated_failure"),
            Self::RepeatedCommand => write!(f, "repeated_command"),
        }
    }
}

/// A fired detector with its evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSignal {
    pub kind: LoopKind,
    pub detail: String,
}

/// Run the detectors in priority order and return the first hit.
pub fn detect(
    phase: Phase,
    executions: &ExecutionHistory,
    outputs: &OutputHistory,
    now: DateTime<Utc>,
) -> Option<LoopSignal> {
    if phase == Phase::Verify {
        if let Some(signal) = severe_output_loop(outputs) {
            return Some(signal);
        }
    } else if let Some(signal) = output_loop(outputs) {
        return Some(signal);
    }

    if let Some(signal) = stagnation(executions, now) {
        return Some(signal);
    }
    if let Some(signal) = repeated_failures(executions) {
        return Some(signal);
    }
    repeated_commands(executions)
}

fn output_loop(outputs: &OutputHistory) -> Option<LoopSignal> {
    signature_loop(
        outputs,
        OUTPUT_LOOP_WINDOW,
        OUTPUT_LOOP_MIN_LEN,
        OUTPUT_LOOP_MAX_DISTINCT,
        LoopKind::OutputLoop,
    )
}

fn severe_output_loop(outputs: &OutputHistory) -> Option<LoopSignal> {
    signature_loop(
        outputs,
        SEVERE_LOOP_WINDOW,
        SEVERE_LOOP_MIN_LEN,
        SEVERE_LOOP_MAX_DISTINCT,
        LoopKind::SevereOutputLoop,
    )
}

fn signature_loop(
    outputs: &OutputHistory,
    window: usize,
    min_len: usize,
    max_distinct: usize,
    kind: LoopKind,
) -> Option<LoopSignal> {
    let signatures = outputs.last_signatures(window);
    if signatures.len() < window {
        return None;
    }
    if signatures.iter().any(|s| s.chars().count() < min_len) {
        return None;
    }
    let distinct: HashSet<&str> = signatures.iter().copied().collect();
    if distinct.len() <= max_distinct {
        return Some(LoopSignal {
            kind,
            detail: format!(
                "last {} outputs collapse to {} distinct signature(s)",
                window,
                distinct.len()
            ),
        });
    }
    None
}

fn stagnation(executions: &ExecutionHistory, now: DateTime<Utc>) -> Option<LoopSignal> {
    let last = executions.last()?;
    let elapsed = now - last.timestamp;
    if elapsed > Duration::milliseconds(STAGNATION_MS) {
        return Some(LoopSignal {
            kind: LoopKind::Stagnation,
            detail: format!(
                "no tool activity for {}s (threshold {}s)",
                elapsed.num_seconds(),
                STAGNATION_MS / 1000
            ),
        });
    }
    None
}

fn repeated_failures(executions: &ExecutionHistory) -> Option<LoopSignal> {
    let recent = executions.last_n(REPEAT_THRESHOLD);
    if recent.len() < REPEAT_THRESHOLD {
        return None;
    }
    if recent.iter().any(|r| r.success) {
        return None;
    }
    let first_key = recent[0].repeat_key();
    if recent.iter().all(|r| r.repeat_key() == first_key) {
        return Some(LoopSignal {
            kind: LoopKind::RepeatedFailure,
            detail: format!(
                "{} identical failing {} calls in a row",
                recent.len(),
                recent[0].tool
            ),
        });
    }
    None
}

fn repeated_commands(executions: &ExecutionHistory) -> Option<LoopSignal> {
    let trailing = executions.trailing_commands();
    if trailing.len() < REPEAT_THRESHOLD {
        return None;
    }
    let recent = &trailing[trailing.len() - REPEAT_THRESHOLD..];
    // Rerunning a passing suite is wasteful but harmless; only failing
    // repeats indicate a loop worth breaking.
    if recent.iter().any(|r| r.success) {
        return None;
    }
    let first_key = recent[0].command_repeat_key()?;
    if recent
        .iter()
        .all(|r| r.command_repeat_key().as_deref() == Some(first_key.as_str()))
    {
        return Some(LoopSignal {
            kind: LoopKind::RepeatedCommand,
            detail: format!(
                "the same command produced identical results {} times in a row",
                REPEAT_THRESHOLD
            ),
        });
    }
    None
}
