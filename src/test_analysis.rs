//! Test-command analysis.
//!
//! Classifies shell commands the agent runs (is it a test run, and of
//! which flavour), scores confidence, judges raw test output, and keeps
//! a bounded per-repository effectiveness history.

use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::repository::RepositoryConfig;

/// Maximum effectiveness records retained per repository.
pub const MAX_EFFECTIVENESS_HISTORY: usize = 100;

static GENERIC_TEST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(^|\s)pytest(\s|$)",
        r"python3?\s+-m\s+pytest",
        r"python3?\s+-m\s+unittest",
        r"(^|\s)unittest(\s|$)",
        r"runtests\.py",
        r"(^|\s)tox(\s|$)",
        r"(^|\s)nox(\s|$)",
        r"manage\.py\s+test",
        r"make\s+test",
        r"(^|/)bin/test(\s|$)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("generic test pattern should compile"))
    .collect()
});

static SHELL_SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?:&&|\|\||;)\s*").expect("separator regex should compile"));

static PASS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b[1-9]\d*\s+passed\b",
        r"(?m)^OK\b",
        r"\bok\s*$",
        r"\b0 failed\b",
        r"(?i)\ball tests passed\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("pass pattern should compile"))
    .collect()
});

static FAIL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bFAILED\b",
        r"\bERROR\b",
        r"\b[1-9]\d*\s+failed\b",
        r"\b[1-9]\d*\s+error(s)?\b",
        r"Traceback \(most recent call last\)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("fail pattern should compile"))
    .collect()
});

static TEST_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w/\.\-]*::test_\w+(?:\[[^\]\s]*\])?|\btest_\w+\b")
        .expect("test name regex should compile")
});

static EXPLORATION_PREFIXES: &[&str] = &[
    "ls", "find", "grep", "cat", "head", "tail", "tree", "pwd", "wc", "git log", "git show",
    "git diff", "git status",
];

/// Flavour of a test command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCategory {
    /// Targets the failing tests that must start passing.
    F2p,
    /// Matches a known-good example invocation (regression suite).
    P2p,
    /// Collects or describes tests without running them.
    Discovery,
    /// Broad suite run with no specific selector.
    Validation,
    /// Non-test shell work (listing, grepping, reading).
    Exploration,
    Unknown,
}

impl std::fmt::Display for TestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::F2p => write!(f, "f2p"),
            Self::P2p => write!(f, "p2p"),
            Self::Discovery => write!(f, "discovery"),
            Self::Validation => write!(f, "validation"),
            Self::Exploration => write!(f, "exploration"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of analysing a command string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAnalysis {
    pub is_test_command: bool,
    pub category: TestCategory,
    /// Confidence in `[0, 1]` that this really runs tests.
    pub confidence: f64,
    /// The shell segment that matched, if any.
    pub matched_segment: Option<String>,
    pub reasoning: String,
}

impl CommandAnalysis {
    fn not_a_test(category: TestCategory, reasoning: &str) -> Self {
        Self {
            is_test_command: false,
            category,
            confidence: 0.0,
            matched_segment: None,
            reasoning: reasoning.to_string(),
        }
    }
}

/// Result of analysing raw test output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputAnalysis {
    pub success: bool,
    pub test_names: Vec<String>,
}

/// One recorded test execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivenessRecord {
    pub command: String,
    pub category: TestCategory,
    pub success: bool,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view over a repository's effectiveness history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectivenessStats {
    pub total: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub by_category: HashMap<String, usize>,
}

/// Stateful analyser; one per task.
#[derive(Debug, Default)]
pub struct TestCommandAnalyzer {
    history: HashMap<String, VecDeque<EffectivenessRecord>>,
}

impl TestCommandAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyse a command string against the repository configuration.
    pub fn analyze_command(&self, command: &str, config: &RepositoryConfig) -> CommandAnalysis {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return CommandAnalysis::not_a_test(TestCategory::Unknown, "empty command");
        }

        let mut best: Option<(String, bool, bool)> = None; // (segment, generic, repo_specific)
        for segment in SHELL_SEPARATOR_RE.split(trimmed) {
            let segment = segment.trim();
            if segment.is_empty() || is_install_segment(segment) || is_excluded_segment(segment) {
                continue;
            }
            let generic = GENERIC_TEST_PATTERNS.iter().any(|re| re.is_match(segment));
            let repo_specific = matches_repo(segment, config);
            if generic || repo_specific {
                let replace = match &best {
                    None => true,
                    // Prefer a repo-specific match over a generic-only one.
                    Some((_, _, best_repo)) => repo_specific && !best_repo,
                };
                if replace {
                    best = Some((segment.to_string(), generic, repo_specific));
                }
            }
        }

        let (segment, generic, repo_specific) = match best {
            Some(found) => found,
            None => {
                if is_exploration_command(trimmed) {
                    return CommandAnalysis::not_a_test(
                        TestCategory::Exploration,
                        "shell exploration, not a test run",
                    );
                }
                return CommandAnalysis::not_a_test(
                    TestCategory::Unknown,
                    "no test pattern matched any segment",
                );
            }
        };

        let exact_runner = !config.test_runner.is_empty()
            && config.test_runner != "auto-detect"
            && segment.contains(config.test_runner.as_str());

        let mut confidence: f64 = 0.0;
        if generic {
            confidence += 0.4;
        }
        if repo_specific {
            confidence += 0.5;
        } else if generic {
            confidence += 0.2;
        }
        if exact_runner {
            confidence += 0.1;
        }
        let confidence = confidence.min(1.0);

        let category = classify_segment(&segment, config);
        CommandAnalysis {
            is_test_command: true,
            category,
            confidence,
            reasoning: format!(
                "matched segment `{}` (generic={}, repo={}, exact_runner={})",
                segment, generic, repo_specific, exact_runner
            ),
            matched_segment: Some(segment),
        }
    }

    /// Judge raw test output: pass patterns present, failure patterns
    /// absent. Also extracts the test names the output mentions.
    pub fn analyze_output(&self, output: &str) -> OutputAnalysis {
        let has_pass = PASS_PATTERNS.iter().any(|re| re.is_match(output));
        let has_fail = FAIL_PATTERNS.iter().any(|re| re.is_match(output));

        let mut test_names: Vec<String> = Vec::new();
        for m in TEST_NAME_RE.find_iter(output) {
            let name = m.as_str().to_string();
            if !test_names.contains(&name) {
                test_names.push(name);
            }
        }

        OutputAnalysis {
            success: has_pass && !has_fail,
            test_names,
        }
    }

    /// Record an execution in the per-repository history, evicting the
    /// oldest entry past the cap.
    pub fn record_execution(&mut self, repo: &str, record: EffectivenessRecord) {
        let entries = self.history.entry(repo.to_string()).or_default();
        if entries.len() >= MAX_EFFECTIVENESS_HISTORY {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Summary statistics for a repository's history.
    pub fn stats(&self, repo: &str) -> EffectivenessStats {
        let entries = match self.history.get(repo) {
            Some(entries) => entries,
            None => return EffectivenessStats::default(),
        };
        let total = entries.len();
        let successes = entries.iter().filter(|r| r.success).count();
        let mut by_category: HashMap<String, usize> = HashMap::new();
        for record in entries {
            *by_category.entry(record.category.to_string()).or_default() += 1;
        }
        EffectivenessStats {
            total,
            successes,
            success_rate: if total > 0 {
                successes as f64 / total as f64
            } else {
                0.0
            },
            by_category,
        }
    }
}

fn is_install_segment(segment: &str) -> bool {
    let lowered = segment.to_lowercase();
    lowered.starts_with("pip install")
        || lowered.starts_with("pip3 install")
        || lowered.starts_with("python -m pip install")
        || lowered.starts_with("python3 -m pip install")
}

fn is_excluded_segment(segment: &str) -> bool {
    segment.contains("runtests.py")
        && (segment.contains("--help") || segment.contains(" -h") || segment.contains("--version"))
}

fn matches_repo(segment: &str, config: &RepositoryConfig) -> bool {
    if !config.test_runner.is_empty()
        && config.test_runner != "auto-detect"
        && segment.contains(config.test_runner.as_str())
    {
        return true;
    }
    config.examples.iter().any(|example| similar(segment, example))
}

/// Whitespace-insensitive equality or containment either way.
fn similar(a: &str, b: &str) -> bool {
    let na = normalize_ws(a);
    let nb = normalize_ws(b);
    na == nb || na.contains(&nb) || nb.contains(&na)
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn classify_segment(segment: &str, config: &RepositoryConfig) -> TestCategory {
    if segment.contains("--help") || segment.contains("--collect-only") {
        return TestCategory::Discovery;
    }
    if config.examples.iter().any(|example| similar(segment, example)) {
        return TestCategory::P2p;
    }
    if segment.contains("::test_") || segment.contains("test_") {
        return TestCategory::F2p;
    }
    if !config.test_runner.is_empty()
        && config.test_runner != "auto-detect"
        && segment.contains(config.test_runner.as_str())
    {
        // Runner invoked with no specific selector: broad validation run.
        return TestCategory::Validation;
    }
    TestCategory::Unknown
}

fn is_exploration_command(command: &str) -> bool {
    let lowered = command.trim().to_lowercase();
    EXPLORATION_PREFIXES.iter().any(|prefix| {
        lowered == *prefix
            || lowered.starts_with(&format!("{} ", prefix))
            || lowered.starts_with(&format!("{}\t", prefix))
    })
}

/// Lightweight detection entry point for callers without an analyser.
pub fn is_test_command(command: &str, config: &RepositoryConfig) -> bool {
    TestCommandAnalyzer::new()
        .analyze_command(command, config)
        .is_test_command
}
