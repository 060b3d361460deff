//! Scripted guidance ("jinnang") messages.
//!
//! Each message fires at one precise trigger point in the interceptor.
//! The text is returned as a tool-result suffix; nothing here unwinds
//! the agent's call chain.

use crate::state::VERIFY_THRESHOLD_COMMANDS;

use super::loop_detect::{LoopKind, LoopSignal};

/// Fired when the apply-diff streak hits the rate limit.
pub fn first_jinnang() -> String {
    "Jinnang Triggered: three patches in a row without verification.\n\
     Stop patching. Before the next apply_diff:\n\
     1. Invoke the stepwise-reasoning tool (use_mcp_tool) to re-rank your \
     hypotheses against the evidence so far.\n\
     2. Perform one non-patch verification action: re-read the modified \
     code or rerun the failing test.\n\
     3. Only then produce a single, minimal patch."
        .to_string()
}

/// One-shot nudge after exactly the second patch of a task.
pub fn second_apply_diff_nudge() -> String {
    "Second modification recorded. If the first patch did not fix the \
     failure, reconsider the diagnosis before stacking further edits; \
     rerun the FAIL_TO_PASS tests to see what actually changed."
        .to_string()
}

/// Emitted every time the tool-call budget boundary is crossed.
pub fn budget_increase_notice(tool_calls_total: u32, budget: u32) -> String {
    format!(
        "Milestone: {} tool calls. The reasoning budget for upcoming turns \
         is now {} tokens; use the extra depth to re-evaluate the overall \
         approach rather than repeating recent steps.",
        tool_calls_total, budget
    )
}

/// Shown once when the first patch is attempted before any test run.
pub fn first_modification_guidance() -> String {
    format!(
        "Hold on: no test has been executed yet. Run the FAIL_TO_PASS \
         tests first to capture the exact failure, then patch. You need \
         {} verification command(s) after your first modification before \
         completion opens up.",
        VERIFY_THRESHOLD_COMMANDS
    )
}

/// Non-blocking warning for writes that target test files.
pub fn test_file_write_guidance(path: &str) -> String {
    format!(
        "Warning: `{}` looks like a test file. Do not create, modify, or \
         delete test files or test methods; fix the production code so the \
         existing tests pass.",
        path
    )
}

/// Fixed rationale for the git-branch hard ban.
pub fn git_branch_ban() -> String {
    "Do NOT switch git branches. The task must be solved on the current \
     checkout; switching branches or checking out other refs discards the \
     baseline the evaluation relies on. Restoring individual files with \
     `git checkout -- <path>` is fine."
        .to_string()
}

/// Steering text for a fired loop detector.
pub fn loop_guidance(signal: &LoopSignal) -> String {
    let advice = match signal.kind {
        LoopKind::OutputLoop | LoopKind::SevereOutputLoop => {
            "The last several tool results are essentially identical; \
             repeating the same action will not add information. Change \
             strategy: read a different file, run a different test, or \
             re-derive the hypothesis from the original failure."
        }
        LoopKind::Stagnation => {
            "A long gap has passed since the last tool result. Summarise \
             where you are, pick the single most informative next action, \
             and take it now."
        }
        LoopKind::RepeatedFailure => {
            "The same call has failed identically several times. The input \
             is wrong, not the timing; inspect the target with a read \
             before retrying."
        }
        LoopKind::RepeatedCommand => {
            "This exact command keeps producing the same result. Rerunning \
             it again proves nothing; act on the result instead."
        }
    };
    format!("Loop detected ({}): {}. {}", signal.kind, signal.detail, advice)
}
