//! Tool interceptor.
//!
//! Every tool invocation passes through `validate_tool_use` before the
//! runner executes it and through `record_tool_execution` afterwards.
//! The validation order is contractual: hard bans, the apply-diff rate
//! limit, the completion shortcut, the write rule, loop detection, and
//! finally the phase gate.

pub mod guidance;
pub mod history;
pub mod loop_detect;
pub mod normalize;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::paths::PathMapper;
use crate::repository::RepositoryConfig;
use crate::review_gate::SubmitReviewGate;
use crate::state::{Phase, WorkflowStateMachine, BUDGET_STEP_CALLS};
use crate::test_analysis::{EffectivenessRecord, TestCommandAnalyzer};
use crate::tools::{keys, ToolName, ToolParams};

use history::{ExecutionHistory, OutputHistory, OutputRecord, ToolExecutionRecord};
use loop_detect::LoopKind;
use normalize::{
    extract_exit_code, infer_success, normalize_command, normalize_stderr, output_signature,
};

pub use history::{MAX_HISTORY_SIZE, MAX_OUTPUT_HISTORY_SIZE};
pub use loop_detect::{LoopSignal, STAGNATION_MS};

/// Apply-diff calls in a row before the rate limit trips.
pub const MAX_CONSECUTIVE_APPLY_DIFF: u32 = 3;

static GIT_SWITCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+switch\b").expect("git switch regex should compile"));

static GIT_CHECKOUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+checkout\b").expect("git checkout regex should compile"));

static TEST_FILE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(^|/)test_[^/]*\.py$",
        r"[^/]*_test\.py$",
        r"(^|/)tests?/",
        r"(^|/)testing/",
        r"_test\.(go|rs|c|cc|cpp)$",
        r"\.test\.(ts|tsx|js|jsx)$",
        r"\.spec\.(ts|js)$",
        r"(^|/)Test[A-Z][^/]*\.java$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("test file pattern should compile"))
    .collect()
});

/// Decision for a proposed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ValidationDecision {
    Allow,
    AllowWithGuidance { guidance: String },
    Block { reason: String },
}

impl ValidationDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Block { .. })
    }

    pub fn guidance(&self) -> Option<&str> {
        match self {
            Self::AllowWithGuidance { guidance } => Some(guidance),
            _ => None,
        }
    }

    pub fn block_reason(&self) -> Option<&str> {
        match self {
            Self::Block { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Outcome of recording an executed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedExecution {
    pub success: bool,
    /// Guidance to append to the tool result, if any fired.
    pub guidance: Option<String>,
}

/// The per-task tool interceptor. Holds a strong reference to its
/// state machine.
pub struct ToolInterceptor {
    state: Rc<RefCell<WorkflowStateMachine>>,
    repository: RepositoryConfig,
    mapper: PathMapper,
    analyzer: TestCommandAnalyzer,
    clock: Rc<dyn Clock>,
    executions: ExecutionHistory,
    outputs: OutputHistory,
    review_gate: SubmitReviewGate,
    consecutive_apply_diff: u32,
    apply_diff_total: u32,
    second_nudge_shown: bool,
}

impl ToolInterceptor {
    pub fn new(
        state: Rc<RefCell<WorkflowStateMachine>>,
        repository: RepositoryConfig,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self::with_mapper(state, repository, clock, PathMapper::default())
    }

    pub fn with_mapper(
        state: Rc<RefCell<WorkflowStateMachine>>,
        repository: RepositoryConfig,
        clock: Rc<dyn Clock>,
        mapper: PathMapper,
    ) -> Self {
        Self {
            state,
            repository,
            mapper,
            analyzer: TestCommandAnalyzer::new(),
            clock,
            executions: ExecutionHistory::new(),
            outputs: OutputHistory::new(),
            review_gate: SubmitReviewGate::new(),
            consecutive_apply_diff: 0,
            apply_diff_total: 0,
            second_nudge_shown: false,
        }
    }

    pub fn consecutive_apply_diff(&self) -> u32 {
        self.consecutive_apply_diff
    }

    pub fn execution_history_len(&self) -> usize {
        self.executions.len()
    }

    /// Validate a proposed tool call. The ordering of the checks below
    /// is contractual.
    pub fn validate_tool_use(&mut self, tool: ToolName, params: &ToolParams) -> ValidationDecision {
        // 1. Hard bans.
        if tool == ToolName::ExecuteCommand {
            if let Some(command) = params.command() {
                if is_git_branch_violation(command) {
                    return self.block(tool, guidance::git_branch_ban());
                }
            }
        }

        // 2. Apply-diff rate limit. Emitting the jinnang resets the
        // streak so the next patch goes through.
        if tool == ToolName::ApplyDiff && self.consecutive_apply_diff >= MAX_CONSECUTIVE_APPLY_DIFF
        {
            self.consecutive_apply_diff = 0;
            return self.block(tool, guidance::first_jinnang());
        }

        // 3. attempt_completion bypasses loop detection entirely; only
        // the phase rule can block it.
        if tool == ToolName::AttemptCompletion {
            let blocked = {
                let state = self.state.borrow();
                (!state.is_tool_allowed(tool)).then(|| {
                    state
                        .get_block_reason(tool)
                        .unwrap_or_else(|| "attempt_completion is not available yet".to_string())
                })
            };
            if let Some(reason) = blocked {
                return self.block(tool, reason);
            }
            return match self.review_gate.on_completion_attempt() {
                Some(reminder) => ValidationDecision::AllowWithGuidance { guidance: reminder },
                None => ValidationDecision::Allow,
            };
        }

        // 4. write_to_file phase rule.
        if tool == ToolName::WriteToFile {
            let blocked = {
                let state = self.state.borrow();
                (state.phase() == Phase::Analyze).then(|| {
                    state.get_block_reason(tool).unwrap_or_else(|| {
                        "write_to_file is not allowed in the ANALYZE phase".to_string()
                    })
                })
            };
            if let Some(reason) = blocked {
                return self.block(tool, reason);
            }
            if let Some(path) = params.path() {
                if is_test_file_path(path) {
                    return ValidationDecision::AllowWithGuidance {
                        guidance: guidance::test_file_write_guidance(path),
                    };
                }
            }
        }

        // 5. Loop detection. Output and repeat loops block; stagnation
        // steers without blocking.
        let mut stagnation_note = None;
        let phase = self.state.borrow().phase();
        if let Some(signal) =
            loop_detect::detect(phase, &self.executions, &self.outputs, self.clock.now())
        {
            if signal.kind == LoopKind::Stagnation {
                stagnation_note = Some(guidance::loop_guidance(&signal));
            } else {
                return self.block(tool, guidance::loop_guidance(&signal));
            }
        }

        // 6. Phase gate.
        let latch = {
            let state = self.state.borrow();
            if state.is_tool_allowed(tool) {
                None
            } else if tool == ToolName::ApplyDiff && state.should_show_first_modification_guidance()
            {
                Some(None)
            } else {
                Some(state.get_block_reason(tool))
            }
        };
        match latch {
            None => {}
            Some(None) => {
                self.state.borrow_mut().mark_first_modification_guidance_shown();
                return self.block(tool, guidance::first_modification_guidance());
            }
            Some(Some(reason)) => return self.block(tool, reason),
        }

        match stagnation_note {
            Some(note) => ValidationDecision::AllowWithGuidance { guidance: note },
            None => ValidationDecision::Allow,
        }
    }

    /// Record an executed tool call: normalise the output, update the
    /// histories and the state machine, and emit any post-execution
    /// guidance.
    pub fn record_tool_execution(
        &mut self,
        tool: ToolName,
        params: &ToolParams,
        output: &str,
    ) -> RecordedExecution {
        let now = self.clock.now();
        let normalized_output = normalize_stderr(output);
        let exit_code = extract_exit_code(output);
        let success = infer_success(output);
        let mut guidance_parts: Vec<String> = Vec::new();

        match tool {
            ToolName::ApplyDiff => {
                self.consecutive_apply_diff += 1;
                self.apply_diff_total += 1;
                if self.apply_diff_total == 2 && !self.second_nudge_shown {
                    self.second_nudge_shown = true;
                    guidance_parts.push(guidance::second_apply_diff_nudge());
                }
            }
            ToolName::UseMcpTool if is_stepwise_reasoning_call(params) => {
                self.consecutive_apply_diff = 0;
            }
            _ => {}
        }

        let normalized_command = if tool == ToolName::ExecuteCommand {
            params.command().map(normalize_command)
        } else {
            None
        };

        if tool == ToolName::ExecuteCommand {
            if let Some(command) = params.command() {
                let analysis = self.analyzer.analyze_command(command, &self.repository);
                if analysis.is_test_command {
                    let output_analysis = self.analyzer.analyze_output(output);
                    let record = EffectivenessRecord {
                        command: command.to_string(),
                        category: analysis.category,
                        success: output_analysis.success,
                        confidence: analysis.confidence,
                        timestamp: now,
                    };
                    self.analyzer
                        .record_execution(&self.repository.repo, record);
                }
            }
        }

        self.outputs.push(OutputRecord {
            signature: output_signature(output),
            timestamp: now,
        });

        self.state.borrow_mut().record_tool_use(tool, params, output);

        {
            let state = self.state.borrow();
            let total = state.tool_calls_total();
            if total > 0 && total % BUDGET_STEP_CALLS == 0 {
                guidance_parts.push(guidance::budget_increase_notice(
                    total,
                    state.get_current_reasoning_config().budget,
                ));
            }
        }

        let guidance = if guidance_parts.is_empty() {
            None
        } else {
            Some(guidance_parts.join("\n\n"))
        };

        self.executions.push(ToolExecutionRecord {
            tool,
            params: params.clone(),
            normalized_output,
            timestamp: now,
            success,
            guidance: guidance.clone(),
            exit_code,
            normalized_command,
        });

        RecordedExecution { success, guidance }
    }

    /// Rewrite path-carrying parameters for the execution side. Pure:
    /// the interceptor state is untouched.
    pub fn apply_path_mapping_to_params(&self, _tool: ToolName, params: &ToolParams) -> ToolParams {
        let mut mapped = params.clone();
        for key in [keys::PATH, keys::FILE_PATH, keys::CWD] {
            if let Some(value) = params.get(key) {
                mapped.insert(key, &self.mapper.map_source_to_target(value));
            }
        }
        if let Some(args) = params.get(keys::ARGS) {
            mapped.insert(keys::ARGS, &self.mapper.map_args_source_to_target(args));
        }
        mapped
    }

    /// Analyser statistics for this task's repository.
    pub fn effectiveness_stats(&self) -> crate::test_analysis::EffectivenessStats {
        self.analyzer.stats(&self.repository.repo)
    }

    /// Restore after deserialisation: streak counters never survive a
    /// reload.
    pub fn restore(&mut self) {
        self.consecutive_apply_diff = 0;
    }

    /// Restore start-of-task interceptor state.
    pub fn reset(&mut self) {
        self.executions.clear();
        self.outputs.clear();
        self.review_gate.reset();
        self.consecutive_apply_diff = 0;
        self.apply_diff_total = 0;
        self.second_nudge_shown = false;
    }

    fn block(&self, tool: ToolName, reason: String) -> ValidationDecision {
        let first_line = reason.lines().next().unwrap_or_default();
        tracing::info!("[SWEBench] Tool blocked: {} - {}", tool, first_line);
        ValidationDecision::Block { reason }
    }
}

/// `git switch` anywhere, or `git checkout` without the `--`
/// file-restore form, is banned outright.
fn is_git_branch_violation(command: &str) -> bool {
    if GIT_SWITCH_RE.is_match(command) {
        return true;
    }
    GIT_CHECKOUT_RE.is_match(command) && !command.contains(" -- ")
}

fn is_test_file_path(path: &str) -> bool {
    TEST_FILE_PATTERNS.iter().any(|re| re.is_match(path))
}

/// Whether a `use_mcp_tool` call targets a stepwise-reasoning tool.
fn is_stepwise_reasoning_call(params: &ToolParams) -> bool {
    let server = params.mcp_server_name().unwrap_or_default().to_lowercase();
    let tool = params.mcp_tool_name().unwrap_or_default().to_lowercase();
    server.contains("sequential")
        || server.contains("thinking")
        || tool.contains("sequential")
        || tool.contains("think")
}
