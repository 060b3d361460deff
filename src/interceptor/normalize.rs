//! Output normalisation for loop detection.
//!
//! Two runs of the same failing command never produce byte-identical
//! output: PIDs, timestamps, and durations differ. The normalisers here
//! strip that noise so the repeat detectors compare what actually
//! matters, while a different exit code still breaks the match.

use std::sync::LazyLock;

use regex::Regex;

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("ansi regex should compile"));

static EXIT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Exit code:\s*(-?\d+)").expect("exit code regex should compile"));

static PID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bpid[ =:]+\d+").expect("pid regex should compile"));

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}([ t]\d{2}:\d{2}:\d{2}(\.\d+)?)?")
        .expect("date regex should compile")
});

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d+(\.\d+)?\s*(ms|s|secs?|seconds?)\b").expect("duration regex should compile")
});

static HEX_ADDR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-f]+").expect("hex regex should compile"));

static WS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("whitespace regex should compile"));

/// Remove ANSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ANSI_RE.replace_all(text, "").into_owned()
}

/// Extract the exit code from an `Exit code: <int>` line, if present.
pub fn extract_exit_code(output: &str) -> Option<i32> {
    EXIT_CODE_RE
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
}

/// Normalise stderr-like text for repeat comparison: strip ANSI,
/// lowercase, and substitute transient tokens.
pub fn normalize_stderr(text: &str) -> String {
    let stripped = strip_ansi(text);
    let lowered = stripped.to_lowercase();
    let pids = PID_RE.replace_all(&lowered, "pid <n>");
    let dates = DATE_RE.replace_all(&pids, "<date>");
    let durations = DURATION_RE.replace_all(&dates, "<duration>");
    let addrs = HEX_ADDR_RE.replace_all(&durations, "<addr>");
    WS_RE.replace_all(addrs.trim(), " ").into_owned()
}

/// Collapse a command string for comparison (whitespace only; the
/// command text itself is significant).
pub fn normalize_command(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Signature of a tool output used by the output-loop detectors.
pub fn output_signature(output: &str) -> String {
    let normalized = normalize_stderr(output);
    // Cap the signature so giant outputs stay cheap to compare.
    normalized.chars().take(400).collect()
}

/// Infer success from an opaque tool output.
///
/// An explicit exit code wins; otherwise the common failure markers
/// decide.
pub fn infer_success(output: &str) -> bool {
    if let Some(code) = extract_exit_code(output) {
        return code == 0;
    }
    let lowered = output.to_lowercase();
    !(lowered.contains("error")
        || lowered.contains("failed")
        || lowered.contains("traceback (most recent call last)")
        || lowered.contains("command not found")
        || lowered.contains("no such file or directory"))
}
