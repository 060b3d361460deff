//! Exploration scoring and progressive guidance escalation.
//!
//! Scores how well the agent understands the repository before it
//! starts patching, produces prioritised recommendations, and escalates
//! guidance verbosity when the agent keeps asking from the same stuck
//! state.

use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// Same fingerprint seen again within this window escalates verbosity.
pub const ESCALATION_WINDOW_MS: i64 = 5 * 60 * 1000;
/// No observations for this long resets the escalation level.
pub const ESCALATION_IDLE_RESET_MS: i64 = 10 * 60 * 1000;
/// Highest verbosity level.
pub const MAX_ESCALATION_LEVEL: u8 = 3;

/// Snapshot of the exploration-relevant state, fed in by the caller.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExplorationView {
    pub read_calls: u32,
    pub tests_run: u32,
    pub has_run_tests: bool,
    pub project_explored: bool,
    pub readme_read: bool,
    pub test_structure_explored: bool,
    pub target_tests_located: bool,
}

/// Priority of a recommendation, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// A single actionable recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: String,
    pub rationale: String,
}

/// Coarse bucket for the understanding score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnderstandingLevel {
    Insufficient,
    Basic,
    Adequate,
    Comprehensive,
}

impl UnderstandingLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=24 => Self::Insufficient,
            25..=49 => Self::Basic,
            50..=74 => Self::Adequate,
            _ => Self::Comprehensive,
        }
    }
}

/// Score the repository understanding on a 0-100 scale.
///
/// File reads contribute up to 40 (stepped at 3/6/12/25), test
/// executions up to 30, the README 15, test-structure exploration 10,
/// project layout 5.
pub fn understanding_score(view: &ExplorationView) -> u32 {
    let read_points = match view.read_calls {
        0..=2 => 0,
        3..=5 => 10,
        6..=11 => 20,
        12..=24 => 30,
        _ => 40,
    };
    let test_points = match view.tests_run {
        0 => 0,
        1 => 10,
        2 => 20,
        _ => 30,
    };
    let mut score = read_points + test_points;
    if view.readme_read {
        score += 15;
    }
    if view.test_structure_explored {
        score += 10;
    }
    if view.project_explored {
        score += 5;
    }
    score.min(100)
}

/// Produce recommendations for the current state, highest priority first.
pub fn recommendations(view: &ExplorationView, min_read_calls: u32) -> Vec<Recommendation> {
    let mut out = Vec::new();
    if !view.has_run_tests {
        out.push(Recommendation {
            priority: Priority::Critical,
            action: "Run the failing tests to capture the exact failure".to_string(),
            rationale: "No test execution has been observed yet".to_string(),
        });
    }
    if !view.readme_read {
        out.push(Recommendation {
            priority: Priority::Critical,
            action: "Read the README and testing documentation".to_string(),
            rationale: "The repository's documented test entry points are unknown".to_string(),
        });
    }
    if !view.target_tests_located {
        out.push(Recommendation {
            priority: Priority::High,
            action: "Locate the target tests by searching for their names".to_string(),
            rationale: "The failing tests have not been found in the tree".to_string(),
        });
    }
    if !view.test_structure_explored {
        out.push(Recommendation {
            priority: Priority::High,
            action: "List the test directory structure".to_string(),
            rationale: "The suite layout has not been explored".to_string(),
        });
    }
    if view.read_calls < min_read_calls {
        out.push(Recommendation {
            priority: Priority::Medium,
            action: format!(
                "Read more of the implicated source files ({}/{} so far)",
                view.read_calls, min_read_calls
            ),
            rationale: "Patches written before reading the code tend to miss context".to_string(),
        });
    }
    if out.is_empty() {
        out.push(Recommendation {
            priority: Priority::Low,
            action: "Exploration looks sufficient; proceed to a minimal fix".to_string(),
            rationale: "All exploration gates are satisfied".to_string(),
        });
    }
    out.sort_by_key(|r| r.priority);
    out
}

/// Escalates guidance verbosity on repeated asks from the same state.
///
/// The fingerprint is deliberately coarse (five flags plus binned
/// counters) so that minor churn does not mask a stuck agent.
pub struct GuidanceEscalator {
    clock: Rc<dyn Clock>,
    last_fingerprint: Option<String>,
    last_seen: Option<DateTime<Utc>>,
    level: u8,
}

impl GuidanceEscalator {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            last_fingerprint: None,
            last_seen: None,
            level: 0,
        }
    }

    /// Observe the current state and return the verbosity level to use.
    pub fn observe(&mut self, view: &ExplorationView) -> u8 {
        let now = self.clock.now();
        let fingerprint = fingerprint(view);

        if let Some(last_seen) = self.last_seen {
            if now - last_seen > Duration::milliseconds(ESCALATION_IDLE_RESET_MS) {
                self.level = 0;
                self.last_fingerprint = None;
            }
        }

        match &self.last_fingerprint {
            Some(last) if *last == fingerprint => {
                let within_window = self
                    .last_seen
                    .map(|seen| now - seen <= Duration::milliseconds(ESCALATION_WINDOW_MS))
                    .unwrap_or(false);
                if within_window && self.level < MAX_ESCALATION_LEVEL {
                    self.level += 1;
                }
            }
            _ => {
                self.level = 0;
            }
        }

        self.last_fingerprint = Some(fingerprint);
        self.last_seen = Some(now);
        self.level
    }

    pub fn level(&self) -> u8 {
        self.level
    }
}

fn fingerprint(view: &ExplorationView) -> String {
    format!(
        "{}{}{}{}{}|r{}|t{}",
        view.has_run_tests as u8,
        view.project_explored as u8,
        view.readme_read as u8,
        view.test_structure_explored as u8,
        view.target_tests_located as u8,
        counter_bin(view.read_calls),
        counter_bin(view.tests_run),
    )
}

fn counter_bin(count: u32) -> u8 {
    match count {
        0..=2 => 0,
        3..=5 => 1,
        6..=11 => 2,
        12..=24 => 3,
        _ => 4,
    }
}
