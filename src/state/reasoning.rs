//! Reasoning-budget policy.
//!
//! Each phase declares a maximum chain-of-thought budget and an effort
//! level; the effective budget scales up with observed tool activity so
//! long sessions get deeper reasoning.

use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// Tool-call interval at which the budget scale steps up.
pub const BUDGET_STEP_CALLS: u32 = 50;

/// Effort hint passed to the model alongside the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
    Disable,
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minimal => write!(f, "minimal"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Disable => write!(f, "disable"),
        }
    }
}

/// Effort plus effective token budget for the next turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    pub effort: ReasoningEffort,
    pub budget: u32,
}

/// Maximum budget per phase.
pub fn max_budget(phase: Phase) -> u32 {
    match phase {
        Phase::Analyze => 16_384,
        Phase::Modify => 8_192,
        Phase::Verify => 16_384,
    }
}

/// Declared effort level per phase.
pub fn phase_effort(phase: Phase) -> ReasoningEffort {
    match phase {
        Phase::Analyze => ReasoningEffort::High,
        Phase::Modify => ReasoningEffort::Medium,
        Phase::Verify => ReasoningEffort::High,
    }
}

/// Effective config for a phase after `tool_calls_total` observed calls.
///
/// `scale = min(1.0, 0.5 + 0.5 * floor(tool_calls_total / 50))`: half
/// budget for the first 50 calls, full budget afterwards.
pub fn scaled_config(phase: Phase, tool_calls_total: u32) -> ReasoningConfig {
    let steps = (tool_calls_total / BUDGET_STEP_CALLS) as f64;
    let scale = (0.5 + 0.5 * steps).min(1.0);
    ReasoningConfig {
        effort: phase_effort(phase),
        budget: (max_budget(phase) as f64 * scale) as u32,
    }
}
