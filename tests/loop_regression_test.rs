//! Regression tests for the stuck-pattern detectors, driven through
//! the interceptor with a manual clock.

use std::rc::Rc;

use chrono::Duration;
use swe_policy::tools::keys;
use swe_policy::{
    ManualClock, MockLlmClient, Phase, PolicyConfig, TaskContext, ToolName, ToolParams,
};

fn task_with_clock() -> (TaskContext, ManualClock) {
    let clock = ManualClock::at_epoch();
    let ctx = TaskContext::with_clock(
        "pytest-dev__pytest-5692",
        PolicyConfig::default(),
        Box::new(MockLlmClient::new()),
        Rc::new(clock.clone()),
    );
    (ctx, clock)
}

fn exec(command: &str) -> ToolParams {
    ToolParams::new().with(keys::COMMAND, command)
}

fn read(path: &str) -> ToolParams {
    ToolParams::new().with(keys::PATH, path)
}

#[test]
fn alternating_identical_outputs_block_further_calls() {
    let (mut ctx, clock) = task_with_clock();

    let error_a = format!("AssertionError in test_a\n{}", "trace line A\n".repeat(20));
    let error_b = format!("AssertionError in test_b\n{}", "trace line B\n".repeat(20));
    for i in 0..5 {
        clock.advance(Duration::seconds(5));
        ctx.record_tool_execution(
            ToolName::ExecuteCommand,
            &exec(&format!("pytest test_a.py::case{}", i * 2)),
            &error_a,
        );
        clock.advance(Duration::seconds(5));
        ctx.record_tool_execution(
            ToolName::ExecuteCommand,
            &exec(&format!("pytest test_b.py::case{}", i * 2 + 1)),
            &error_b,
        );
    }

    let decision = ctx.validate_tool_use(ToolName::ReadFile, &read("/testbed/a.py"));
    assert!(!decision.is_allowed());
    assert!(decision.block_reason().unwrap().contains("output_loop"));
}

#[test]
fn verify_phase_tolerates_alternation_but_not_collapse() {
    let (mut ctx, clock) = task_with_clock();
    ctx.state().borrow_mut().force_phase(Phase::Verify, "test setup");

    let error_a = "E".repeat(300);
    let error_b = "F".repeat(300);
    for i in 0..6 {
        clock.advance(Duration::seconds(5));
        ctx.record_tool_execution(
            ToolName::ExecuteCommand,
            &exec(&format!("pytest suite{}", i)),
            &error_a,
        );
        clock.advance(Duration::seconds(5));
        ctx.record_tool_execution(
            ToolName::ExecuteCommand,
            &exec(&format!("pytest other{}", i)),
            &error_b,
        );
    }
    // Two distinct signatures: tolerated in VERIFY.
    let decision = ctx.validate_tool_use(ToolName::ReadFile, &read("/testbed/a.py"));
    assert!(decision.is_allowed());

    // Total collapse to one signature: not tolerated.
    for i in 0..12 {
        clock.advance(Duration::seconds(5));
        ctx.record_tool_execution(
            ToolName::ExecuteCommand,
            &exec(&format!("pytest suite{}", i)),
            &error_a,
        );
    }
    let decision = ctx.validate_tool_use(ToolName::ReadFile, &read("/testbed/a.py"));
    assert!(!decision.is_allowed());
    assert!(decision
        .block_reason()
        .unwrap()
        .contains("severe_output_loop"));
}

#[test]
fn stagnation_injects_steering_but_allows_the_call() {
    let (mut ctx, clock) = task_with_clock();
    ctx.record_tool_execution(ToolName::ExecuteCommand, &exec("pytest a.py"), "1 failed");

    clock.advance(Duration::minutes(5) + Duration::seconds(1));
    let decision = ctx.validate_tool_use(ToolName::ReadFile, &read("/testbed/a.py"));
    assert!(decision.is_allowed());
    let note = decision.guidance().unwrap();
    assert!(note.contains("stagnation"));
}

#[test]
fn repeated_identical_failures_block() {
    let (mut ctx, clock) = task_with_clock();
    ctx.record_tool_execution(ToolName::ExecuteCommand, &exec("pytest a.py"), "1 failed");

    let params = ToolParams::new()
        .with(keys::PATH, "/testbed/src/mod.py")
        .with(keys::DIFF, "@@ mismatched hunk @@");
    for _ in 0..3 {
        clock.advance(Duration::seconds(10));
        ctx.record_tool_execution(
            ToolName::ApplyDiff,
            &params,
            "ERROR: patch failed to apply at line 40",
        );
    }

    let decision = ctx.validate_tool_use(ToolName::ReadFile, &read("/testbed/src/mod.py"));
    assert!(!decision.is_allowed());
    assert!(decision
        .block_reason()
        .unwrap()
        .contains("repeated_failure"));
}

#[test]
fn repeating_a_passing_suite_is_not_a_loop() {
    let (mut ctx, clock) = task_with_clock();
    for _ in 0..6 {
        clock.advance(Duration::seconds(10));
        ctx.record_tool_execution(
            ToolName::ExecuteCommand,
            &exec("python -m pytest testing/test_assertion.py"),
            "12 passed in 0.30s\nExit code: 0",
        );
    }
    let decision = ctx.validate_tool_use(ToolName::ReadFile, &read("/testbed/a.py"));
    assert!(decision.is_allowed());
}

#[test]
fn repeated_failing_command_with_shifting_cwd_blocks() {
    let (mut ctx, clock) = task_with_clock();
    for cwd in ["/testbed", "/testbed/tests", "/testbed/src"] {
        clock.advance(Duration::seconds(10));
        ctx.record_tool_execution(
            ToolName::ExecuteCommand,
            &exec("pytest missing_file.py").with(keys::CWD, cwd),
            "ERROR: file or directory not found: missing_file.py\nExit code: 4",
        );
    }
    let decision = ctx.validate_tool_use(ToolName::ReadFile, &read("/testbed/a.py"));
    assert!(!decision.is_allowed());
    assert!(decision
        .block_reason()
        .unwrap()
        .contains("repeated_command"));
}

#[test]
fn transient_noise_does_not_defeat_the_repeat_detector() {
    let (mut ctx, clock) = task_with_clock();
    // Same failure, different PIDs, timestamps, and durations.
    let outputs = [
        "worker pid 101 failed at 2024-01-01 10:00:00 after 1.2s\nExit code: 2",
        "worker pid 202 failed at 2024-01-02 11:30:00 after 3.4s\nExit code: 2",
        "worker pid 303 failed at 2024-01-03 12:45:00 after 0.9s\nExit code: 2",
    ];
    for (i, output) in outputs.iter().enumerate() {
        clock.advance(Duration::seconds(10));
        ctx.record_tool_execution(
            ToolName::ExecuteCommand,
            &exec("pytest flaky.py").with(keys::CWD, &format!("/testbed/run{}", i)),
            output,
        );
    }
    let decision = ctx.validate_tool_use(ToolName::ReadFile, &read("/testbed/a.py"));
    assert!(!decision.is_allowed());
    assert!(decision
        .block_reason()
        .unwrap()
        .contains("repeated_command"));
}
