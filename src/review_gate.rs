//! One-shot review reminder at the first completion attempt.

use serde::{Deserialize, Serialize};

const REVIEW_REMINDER: &str = "\
Before you finalise: review your work once more.\n\
1. Inspect the full diff of your changes.\n\
2. Review behaviour, edge cases, and possible regressions.\n\
3. Run the FAIL_TO_PASS tests, then the PASS_TO_PASS tests.\n\
4. Read the logs of the final runs, not just the exit status.\n\
If everything holds, submit again.";

/// Latch that injects a review reminder exactly once, at the first
/// completion attempt of a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitReviewGate {
    reminder_shown: bool,
}

impl SubmitReviewGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the reminder on the first call, `None` afterwards.
    pub fn on_completion_attempt(&mut self) -> Option<String> {
        if self.reminder_shown {
            return None;
        }
        self.reminder_shown = true;
        Some(REVIEW_REMINDER.to_string())
    }

    pub fn reminder_shown(&self) -> bool {
        self.reminder_shown
    }

    pub fn reset(&mut self) {
        self.reminder_shown = false;
    }
}
