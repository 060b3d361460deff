//! Condensation error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a condensation attempt was rejected or failed.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CondenseError {
    /// The keep-set already covers the whole transcript.
    #[error("nothing to condense: {detail}")]
    NothingToCondense { detail: String },

    /// The summarisation request failed at the client boundary.
    #[error("summarization failed: {detail}")]
    SummarizationFailed { detail: String },

    /// Token counting failed at the client boundary.
    #[error("token counting failed: {detail}")]
    TokenCount { detail: String },

    /// The condensed transcript would be at least as large as the
    /// original.
    #[error("condensed transcript would not shrink ({condensed} >= {original} tokens)")]
    WouldGrow { condensed: u32, original: u32 },

    /// A summary already sits inside the recent-message window.
    #[error("a summary already exists within the last {window} messages")]
    RecentSummary { window: usize },
}

impl CondenseError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SummarizationFailed { .. } | Self::TokenCount { .. }
        )
    }
}
