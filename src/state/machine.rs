//! Workflow state machine.
//!
//! Owns the phase, the task counters, and the reasoning budget. The
//! interceptor consults it for tool permission and feeds it every
//! observed execution; transitions are driven purely by that observed
//! activity and recorded in an audit log.

use serde::{Deserialize, Serialize};

use crate::exploration::ExplorationView;
use crate::repository::{get_repository_config, RepositoryConfig};
use crate::test_analysis::{is_test_command, TestCommandAnalyzer};
use crate::tools::{keys, ToolName, ToolParams};

use super::phase::Phase;
use super::reasoning::{scaled_config, ReasoningConfig};

/// Test-flavoured command executions required after the first
/// modification before VERIFY opens.
pub const VERIFY_THRESHOLD_COMMANDS: u32 = 6;

/// One recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    /// Value of `tool_calls_total` when the transition fired.
    pub at_tool_call: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether this was a forced (recovery) transition.
    #[serde(default)]
    pub forced: bool,
}

/// Serialisable snapshot of the machine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub phase: Phase,
    pub instance_id: Option<String>,
    pub repository_type: Option<String>,
    pub tool_calls_total: u32,
    pub tests_run_count: u32,
    pub read_calls_count: u32,
    pub test_calls_count: u32,
    pub modification_count: u32,
    pub attempt_completion_count: u32,
    pub has_run_tests: bool,
    pub tests_passed_after_modify: bool,
    pub first_modification_guidance_shown: bool,
    pub modified_files: Vec<String>,
    pub reasoning_config: ReasoningConfig,
    pub project_explored: bool,
    pub readme_read: bool,
    pub test_structure_explored: bool,
    pub target_tests_located: bool,
}

/// The per-task workflow state machine.
#[derive(Debug)]
pub struct WorkflowStateMachine {
    phase: Phase,
    instance_id: Option<String>,
    repository_type: Option<String>,
    repository: Option<RepositoryConfig>,

    tool_calls_total: u32,
    tests_run_count: u32,
    read_calls_count: u32,
    test_calls_count: u32,
    modification_count: u32,
    attempt_completion_count: u32,

    has_run_tests: bool,
    tests_passed_after_modify: bool,
    first_modification_guidance_shown: bool,

    modified_files: Vec<String>,
    reasoning: ReasoningConfig,

    project_explored: bool,
    readme_read: bool,
    test_structure_explored: bool,
    target_tests_located: bool,

    transitions: Vec<TransitionRecord>,
}

impl WorkflowStateMachine {
    /// Create a machine for an instance, resolving its repository
    /// configuration from the registry.
    pub fn for_instance(instance_id: &str) -> Self {
        let repository = get_repository_config(instance_id);
        Self::with_repository(Some(instance_id.to_string()), Some(repository))
    }

    /// Create a machine with an explicit (or absent) repository config.
    pub fn with_repository(
        instance_id: Option<String>,
        repository: Option<RepositoryConfig>,
    ) -> Self {
        let repository_type = repository
            .as_ref()
            .map(|config| config.project_type.to_string());
        Self {
            phase: Phase::Analyze,
            instance_id,
            repository_type,
            repository,
            tool_calls_total: 0,
            tests_run_count: 0,
            read_calls_count: 0,
            test_calls_count: 0,
            modification_count: 0,
            attempt_completion_count: 0,
            has_run_tests: false,
            tests_passed_after_modify: false,
            first_modification_guidance_shown: false,
            modified_files: Vec::new(),
            reasoning: scaled_config(Phase::Analyze, 0),
            project_explored: false,
            readme_read: false,
            test_structure_explored: false,
            target_tests_located: false,
            transitions: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Capability ports (read side)
    // ------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn repository(&self) -> Option<&RepositoryConfig> {
        self.repository.as_ref()
    }

    pub fn tool_calls_total(&self) -> u32 {
        self.tool_calls_total
    }

    pub fn tests_run_count(&self) -> u32 {
        self.tests_run_count
    }

    pub fn test_calls_count(&self) -> u32 {
        self.test_calls_count
    }

    pub fn read_calls_count(&self) -> u32 {
        self.read_calls_count
    }

    pub fn modification_count(&self) -> u32 {
        self.modification_count
    }

    pub fn attempt_completion_count(&self) -> u32 {
        self.attempt_completion_count
    }

    pub fn has_run_tests(&self) -> bool {
        self.has_run_tests
    }

    pub fn tests_passed_after_modify(&self) -> bool {
        self.tests_passed_after_modify
    }

    pub fn modified_files(&self) -> &[String] {
        &self.modified_files
    }

    pub fn get_current_reasoning_config(&self) -> ReasoningConfig {
        self.reasoning
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Exploration-relevant slice of the state.
    pub fn exploration_view(&self) -> ExplorationView {
        ExplorationView {
            read_calls: self.read_calls_count,
            tests_run: self.tests_run_count,
            has_run_tests: self.has_run_tests,
            project_explored: self.project_explored,
            readme_read: self.readme_read,
            test_structure_explored: self.test_structure_explored,
            target_tests_located: self.target_tests_located,
        }
    }

    /// Whether `tool` may run in the current phase.
    pub fn is_tool_allowed(&self, tool: ToolName) -> bool {
        match self.phase {
            Phase::Analyze => match tool {
                _ if tool.is_read_tool() || tool.is_mcp_tool() => true,
                ToolName::ExecuteCommand => true,
                // The first patch attempt is blocked exactly once; after
                // the guidance latch flips it goes through.
                ToolName::ApplyDiff => {
                    self.modification_count > 0
                        || self.has_run_tests
                        || self.first_modification_guidance_shown
                }
                _ => false,
            },
            Phase::Modify => !matches!(tool, ToolName::AttemptCompletion),
            Phase::Verify => true,
        }
    }

    /// Explain why `tool` is blocked, or `None` when it is allowed.
    pub fn get_block_reason(&self, tool: ToolName) -> Option<String> {
        if self.is_tool_allowed(tool) {
            return None;
        }
        let reason = match (tool, self.phase) {
            (ToolName::AttemptCompletion, Phase::Analyze) => {
                "attempt_completion is not available during ANALYZE. Reproduce the failure \
                 with the repository's test runner, make the fix, and verify it first."
                    .to_string()
            }
            (ToolName::AttemptCompletion, Phase::Modify) => {
                let remaining =
                    VERIFY_THRESHOLD_COMMANDS.saturating_sub(self.test_calls_count);
                format!(
                    "attempt_completion is not available yet: run {} more execute_command \
                     verification(s) to enter VERIFY. Before completing you must:\n\
                     1. Inspect the full diff of your changes.\n\
                     2. Review behaviour, edge cases, and possible regressions.\n\
                     3. Run the FAIL_TO_PASS tests, then the PASS_TO_PASS tests.\n\
                     4. Read the logs of the final runs, not just the exit status.",
                    remaining
                )
            }
            (ToolName::ApplyDiff, Phase::Analyze) => {
                "apply_diff is blocked until at least one test command has been executed. \
                 Run the failing tests first to capture the exact failure."
                    .to_string()
            }
            (tool, phase) => format!("{} is not allowed in the {} phase", tool, phase),
        };
        Some(reason)
    }

    /// Gate summary for explicit transition requests.
    pub fn can_transition_to(&self, target: Phase) -> bool {
        match target {
            Phase::Analyze => true,
            Phase::Modify => self.phase == Phase::Analyze && self.has_run_tests,
            Phase::Verify => self.phase == Phase::Modify && self.modification_count >= 1,
        }
    }

    /// One-shot latch: true exactly once, for the first patch attempt
    /// in ANALYZE before any test has run.
    pub fn should_show_first_modification_guidance(&self) -> bool {
        self.phase == Phase::Analyze
            && !self.has_run_tests
            && self.modification_count == 0
            && !self.first_modification_guidance_shown
    }

    pub fn mark_first_modification_guidance_shown(&mut self) {
        self.first_modification_guidance_shown = true;
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Record one executed tool call, updating counters, flags, the
    /// phase, and the reasoning budget.
    pub fn record_tool_use(&mut self, tool: ToolName, params: &ToolParams, output: &str) {
        self.tool_calls_total += 1;

        match tool {
            _ if tool.is_read_tool() => self.record_read(tool, params, output),
            ToolName::ExecuteCommand => self.record_execute(params, output),
            _ if tool.is_modification_tool() => self.record_modification(params),
            ToolName::AttemptCompletion => self.attempt_completion_count += 1,
            _ => {}
        }

        self.reasoning = scaled_config(self.phase, self.tool_calls_total);
    }

    fn record_read(&mut self, tool: ToolName, params: &ToolParams, output: &str) {
        self.read_calls_count += 1;

        let path = params.path().unwrap_or_default().to_lowercase();
        let pattern = params
            .get(keys::REGEX)
            .or_else(|| params.get(keys::QUERY))
            .unwrap_or_default()
            .to_lowercase();

        if path.contains("readme") {
            self.readme_read = true;
        }
        // Strip the mount roots so "/testbed" itself does not register
        // as test-suite exploration.
        let rel = path
            .strip_prefix("/workspace/repo")
            .or_else(|| path.strip_prefix("/testbed"))
            .unwrap_or(&path);
        if rel.contains("test") || pattern.contains("test") {
            self.test_structure_explored = true;
        }
        if tool == ToolName::SearchFiles && pattern.contains("test_") && output.contains("test_") {
            self.target_tests_located = true;
        }
        let min_read_calls = self
            .repository
            .as_ref()
            .map(|config| config.min_read_calls)
            .unwrap_or(5);
        if self.read_calls_count >= min_read_calls {
            self.project_explored = true;
        }
    }

    fn record_execute(&mut self, params: &ToolParams, output: &str) {
        self.has_run_tests = true;
        self.test_calls_count += 1;

        let command = params.command().unwrap_or_default();
        let is_test = {
            let generic_config;
            let config = match self.repository.as_ref() {
                Some(config) => config,
                None => {
                    generic_config = RepositoryConfig::generic("unknown");
                    &generic_config
                }
            };
            is_test_command(command, config)
        };
        if is_test {
            self.tests_run_count += 1;
        }

        if self.modification_count >= 1 {
            let analysis = TestCommandAnalyzer::new().analyze_output(output);
            if analysis.success {
                self.tests_passed_after_modify = true;
            }
        }

        match self.phase {
            Phase::Analyze => {
                // Deliberately permissive: the external runner only
                // routes test-flavoured commands through here.
                self.transition_to(Phase::Modify, Some("first command executed"), false);
            }
            Phase::Modify => {
                if self.modification_count >= 1
                    && self.test_calls_count >= VERIFY_THRESHOLD_COMMANDS
                {
                    self.transition_to(
                        Phase::Verify,
                        Some("verification threshold reached"),
                        false,
                    );
                }
            }
            Phase::Verify => {}
        }
    }

    fn record_modification(&mut self, params: &ToolParams) {
        self.modification_count += 1;
        if let Some(path) = params.path() {
            if !self.modified_files.iter().any(|p| p == path) {
                self.modified_files.push(path.to_string());
            }
        }
    }

    /// Forced transition for recovery workflows. Invariants are not
    /// re-checked; the jump is logged so it stays auditable.
    pub fn force_phase(&mut self, target: Phase, reason: &str) {
        tracing::warn!(from = %self.phase, to = %target, reason, "forced phase transition");
        self.transition_to(target, Some(reason), true);
    }

    fn transition_to(&mut self, target: Phase, reason: Option<&str>, forced: bool) {
        if self.phase == target {
            return;
        }
        tracing::info!("[SWEBench] Phase transition: {} -> {}", self.phase, target);
        tracing::debug!(
            from = %self.phase,
            to = %target,
            tool_calls = self.tool_calls_total,
            forced,
            "phase transition"
        );
        self.transitions.push(TransitionRecord {
            from: self.phase,
            to: target,
            at_tool_call: self.tool_calls_total,
            reason: reason.map(String::from),
            forced,
        });
        self.phase = target;
        self.reasoning = scaled_config(self.phase, self.tool_calls_total);
    }

    /// Restore start-of-task state, keeping the repository configuration.
    pub fn reset(&mut self) {
        let instance_id = self.instance_id.take();
        let repository = self.repository.take();
        *self = Self::with_repository(instance_id, repository);
    }

    // ------------------------------------------------------------------
    // Serialisation
    // ------------------------------------------------------------------

    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            phase: self.phase,
            instance_id: self.instance_id.clone(),
            repository_type: self.repository_type.clone(),
            tool_calls_total: self.tool_calls_total,
            tests_run_count: self.tests_run_count,
            read_calls_count: self.read_calls_count,
            test_calls_count: self.test_calls_count,
            modification_count: self.modification_count,
            attempt_completion_count: self.attempt_completion_count,
            has_run_tests: self.has_run_tests,
            tests_passed_after_modify: self.tests_passed_after_modify,
            first_modification_guidance_shown: self.first_modification_guidance_shown,
            modified_files: self.modified_files.clone(),
            reasoning_config: self.reasoning,
            project_explored: self.project_explored,
            readme_read: self.readme_read,
            test_structure_explored: self.test_structure_explored,
            target_tests_located: self.target_tests_located,
        }
    }

    /// Rebuild a machine from a snapshot, re-resolving the repository
    /// configuration from the registry.
    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        let repository = snapshot
            .instance_id
            .as_deref()
            .map(get_repository_config);
        Self {
            phase: snapshot.phase,
            instance_id: snapshot.instance_id,
            repository_type: snapshot.repository_type,
            repository,
            tool_calls_total: snapshot.tool_calls_total,
            tests_run_count: snapshot.tests_run_count,
            read_calls_count: snapshot.read_calls_count,
            test_calls_count: snapshot.test_calls_count,
            modification_count: snapshot.modification_count,
            attempt_completion_count: snapshot.attempt_completion_count,
            has_run_tests: snapshot.has_run_tests,
            tests_passed_after_modify: snapshot.tests_passed_after_modify,
            first_modification_guidance_shown: snapshot.first_modification_guidance_shown,
            modified_files: snapshot.modified_files,
            reasoning: snapshot.reasoning_config,
            project_explored: snapshot.project_explored,
            readme_read: snapshot.readme_read,
            test_structure_explored: snapshot.test_structure_explored,
            target_tests_located: snapshot.target_tests_located,
            transitions: Vec::new(),
        }
    }

    /// One-line progress summary, embedded in condensation prompts.
    pub fn progress_summary(&self) -> String {
        format!(
            "phase={} tool_calls={} test_runs={} modifications={} modified_files=[{}] \
             tests_passed_after_modify={}",
            self.phase,
            self.tool_calls_total,
            self.tests_run_count,
            self.modification_count,
            self.modified_files.join(", "),
            self.tests_passed_after_modify,
        )
    }
}
