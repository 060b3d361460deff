//! Phase-guidance prompt generation: a small template engine plus the
//! per-phase generator with deterministic fallback.

pub mod generator;
pub mod template;

pub use generator::{GeneratedPrompt, PromptContext, PromptGenerator};
pub use template::{render, RenderedTemplate, TemplateError, MAX_CONDITIONAL_ITERATIONS};
