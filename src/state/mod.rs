//! Workflow state: phases, counters, transitions, and the reasoning
//! budget policy.

pub mod machine;
pub mod phase;
pub mod reasoning;

pub use machine::{StateSnapshot, TransitionRecord, WorkflowStateMachine, VERIFY_THRESHOLD_COMMANDS};
pub use phase::Phase;
pub use reasoning::{
    max_budget, phase_effort, scaled_config, ReasoningConfig, ReasoningEffort, BUDGET_STEP_CALLS,
};
