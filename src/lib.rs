//! Policy engine for an autonomous code-repair agent.
//!
//! Sits between the agent (an LLM acting through a fixed tool set) and
//! the execution environment while the agent works a SWE-bench
//! instance. It observes every tool invocation and decides whether to
//! permit it, rewrite its parameters, block it with guidance, or steer
//! the agent's next turn; it also keeps the conversation bounded by
//! condensing the transcript under token pressure.
//!
//! The engine decides and advises only: it never executes tools, talks
//! to a model (beyond the condensation summary), mutates files, or
//! judges patch correctness.
//!
//! # Components
//!
//! - [`state`]: the ANALYZE → MODIFY → VERIFY workflow machine with
//!   tool gating and reasoning-budget scaling.
//! - [`interceptor`]: per-call validation, path rewriting, loop
//!   detection, and scripted guidance injection.
//! - [`compressor`]: transcript condensation with tool-call pairing and
//!   a strictly more aggressive fallback.
//! - [`prompt`]: phase-guidance templates with deterministic fallback.
//! - [`repository`], [`test_analysis`], [`exploration`], [`paths`]:
//!   the supporting registries and analysers.
//!
//! One [`task::TaskContext`] per instance owns one of each component;
//! nothing is shared across tasks.

pub mod clock;
pub mod compressor;
pub mod exploration;
pub mod interceptor;
pub mod paths;
pub mod prompt;
pub mod repository;
pub mod review_gate;
pub mod state;
pub mod task;
pub mod test_analysis;
pub mod tools;

// Re-export the key state types
pub use state::{
    Phase, ReasoningConfig, ReasoningEffort, StateSnapshot, TransitionRecord,
    WorkflowStateMachine, BUDGET_STEP_CALLS, VERIFY_THRESHOLD_COMMANDS,
};

// Re-export the key interceptor types
pub use interceptor::{
    LoopSignal, RecordedExecution, ToolInterceptor, ValidationDecision,
    MAX_CONSECUTIVE_APPLY_DIFF, MAX_HISTORY_SIZE, MAX_OUTPUT_HISTORY_SIZE, STAGNATION_MS,
};

// Re-export the key compressor types
pub use compressor::{
    CompressorConfig, CondenseError, CondenseOutcome, CondenseReport, ContentBlock,
    ContextCompressor, LlmClient, LlmError, MessageChunk, MessageContent, MockLlmClient, Role,
    TranscriptMessage,
};

// Re-export the tool surface
pub use tools::{ToolName, ToolParams};

// Re-export the path mapper
pub use paths::PathMapper;

// Re-export the repository registry
pub use repository::{get_repository_config, repo_from_instance_id, ProjectType, RepositoryConfig};

// Re-export the analysers
pub use exploration::{
    recommendations, understanding_score, ExplorationView, GuidanceEscalator, Priority,
    Recommendation, UnderstandingLevel,
};
pub use test_analysis::{CommandAnalysis, OutputAnalysis, TestCategory, TestCommandAnalyzer};

// Re-export the prompt generator
pub use prompt::{GeneratedPrompt, PromptContext, PromptGenerator};

// Re-export the task bundle
pub use task::{PolicyConfig, TaskContext};

// Re-export the clock seam
pub use clock::{Clock, ManualClock, SystemClock};

// Re-export the review gate
pub use review_gate::SubmitReviewGate;
