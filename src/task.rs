//! Per-task ownership bundle.
//!
//! One task owns one state machine, one interceptor, and one
//! compressor. The interceptor holds the state machine strongly, the
//! compressor weakly. Callers thread this handle through the call
//! chain instead of reaching for process-wide state, which is what
//! keeps concurrent tasks isolated.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::compressor::{
    CompressorConfig, CondenseOutcome, ContextCompressor, LlmClient, TranscriptMessage,
};
use crate::exploration::{recommendations, GuidanceEscalator};
use crate::interceptor::{RecordedExecution, ToolInterceptor, ValidationDecision};
use crate::paths::PathMapper;
use crate::prompt::{GeneratedPrompt, PromptContext, PromptGenerator};
use crate::repository::{get_repository_config, RepositoryConfig};
use crate::state::{StateSnapshot, WorkflowStateMachine};
use crate::tools::{ToolName, ToolParams};

/// Task-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub path_mapper: PathMapper,
    pub compressor: CompressorConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path_mapper: PathMapper::default(),
            compressor: CompressorConfig::default(),
        }
    }
}

/// Everything the policy engine holds for one task.
pub struct TaskContext {
    instance_id: String,
    repository: RepositoryConfig,
    state: Rc<RefCell<WorkflowStateMachine>>,
    interceptor: ToolInterceptor,
    compressor: ContextCompressor,
    generator: PromptGenerator,
    escalator: GuidanceEscalator,
    clock: Rc<dyn Clock>,
}

impl TaskContext {
    /// Build a task context with the system clock.
    pub fn new(instance_id: &str, config: PolicyConfig, client: Box<dyn LlmClient>) -> Self {
        Self::with_clock(instance_id, config, client, Rc::new(SystemClock))
    }

    /// Build a task context with an injected clock (tests).
    pub fn with_clock(
        instance_id: &str,
        config: PolicyConfig,
        client: Box<dyn LlmClient>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let repository = get_repository_config(instance_id);
        let state = Rc::new(RefCell::new(WorkflowStateMachine::for_instance(instance_id)));

        let interceptor = ToolInterceptor::with_mapper(
            Rc::clone(&state),
            repository.clone(),
            Rc::clone(&clock),
            config.path_mapper.clone(),
        );

        let mut compressor =
            ContextCompressor::new(config.compressor, client, Rc::clone(&clock));
        compressor.set_state_machine(Rc::downgrade(&state));

        Self {
            instance_id: instance_id.to_string(),
            repository,
            state,
            interceptor,
            compressor,
            generator: PromptGenerator::new(),
            escalator: GuidanceEscalator::new(Rc::clone(&clock)),
            clock,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn repository(&self) -> &RepositoryConfig {
        &self.repository
    }

    /// Shared handle to the state machine.
    pub fn state(&self) -> Rc<RefCell<WorkflowStateMachine>> {
        Rc::clone(&self.state)
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        self.state.borrow().to_snapshot()
    }

    pub fn interceptor(&self) -> &ToolInterceptor {
        &self.interceptor
    }

    pub fn compressor(&self) -> &ContextCompressor {
        &self.compressor
    }

    /// Validate a proposed tool call.
    pub fn validate_tool_use(&mut self, tool: ToolName, params: &ToolParams) -> ValidationDecision {
        self.interceptor.validate_tool_use(tool, params)
    }

    /// Rewrite params for the execution side.
    pub fn apply_path_mapping(&self, tool: ToolName, params: &ToolParams) -> ToolParams {
        self.interceptor.apply_path_mapping_to_params(tool, params)
    }

    /// Record an executed tool call.
    pub fn record_tool_execution(
        &mut self,
        tool: ToolName,
        params: &ToolParams,
        output: &str,
    ) -> RecordedExecution {
        self.interceptor.record_tool_execution(tool, params, output)
    }

    /// Run transcript condensation if the token pressure demands it.
    pub fn maybe_condense(
        &self,
        messages: &mut Vec<TranscriptMessage>,
        system_prompt: &str,
        last_message_tokens: u32,
    ) -> Option<CondenseOutcome> {
        let total = match self.compressor.transcript_tokens(messages, system_prompt) {
            Ok(total) => total,
            Err(error) => {
                tracing::warn!(error = %error, "token counting failed, skipping condensation");
                return None;
            }
        };
        if !self.compressor.should_condense(total, last_message_tokens) {
            return None;
        }
        Some(self.compressor.condense(messages, system_prompt))
    }

    /// Render the phase-guidance prompt for the agent's next turn.
    ///
    /// Repeated asks from the same exploration state escalate: the top
    /// outstanding recommendations are appended, more of them each time.
    pub fn phase_guidance(&mut self) -> GeneratedPrompt {
        let prompt_ctx = {
            let state = self.state.borrow();
            PromptContext {
                phase: state.phase(),
                repository: self.repository.clone(),
                tool_calls_total: state.tool_calls_total(),
                tests_run_count: state.tests_run_count(),
                modification_count: state.modification_count(),
                exploration: state.exploration_view(),
            }
        };
        let level = self.escalator.observe(&prompt_ctx.exploration);
        let mut prompt = self.generator.generate(&prompt_ctx);
        if level > 0 {
            let top: Vec<String> =
                recommendations(&prompt_ctx.exploration, self.repository.min_read_calls)
                    .iter()
                    .take(1 + level as usize)
                    .map(|r| format!("- [{}] {}", r.priority, r.action))
                    .collect();
            prompt.text.push_str(&format!(
                "\n\nYou have asked for guidance from this same position {} time(s) \
                 without progress. Address these first:\n{}",
                level,
                top.join("\n")
            ));
        }
        prompt
    }

    /// Restore start-of-task state, keeping the repository config.
    pub fn reset(&mut self) {
        self.state.borrow_mut().reset();
        self.interceptor.reset();
        self.escalator = GuidanceEscalator::new(Rc::clone(&self.clock));
    }
}
