//! Workflow phases.

use serde::{Deserialize, Serialize};

/// The three workflow phases.
///
/// Every task starts in `Analyze`; `Verify` is terminal for automatic
/// transitions (only a forced transition leaves it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Explore the repository and reproduce the failure.
    Analyze,
    /// Patch the defect.
    Modify,
    /// Re-run the suites and review before completing.
    Verify,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyze => "ANALYZE",
            Self::Modify => "MODIFY",
            Self::Verify => "VERIFY",
        }
    }

    /// Whether automatic transitions ever leave this phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verify)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
