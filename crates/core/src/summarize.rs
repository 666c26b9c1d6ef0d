//! Summarizer trait — optional compression collaborator.
//!
//! When configured, the history fitter offers the evicted tail to a
//! summarizer instead of dropping it outright. The contract: the returned
//! unit must cost fewer tokens than the sum of its inputs (the engine
//! verifies by re-counting). Any failure is non-fatal — the fitter falls
//! back to its drop/truncate policy.

use async_trait::async_trait;
use thiserror::Error;

use crate::unit::ContextUnit;

/// Summarization failed; the caller falls back to eviction.
#[derive(Debug, Clone, Error)]
pub enum SummarizeError {
    /// The summarization backend failed (model call, timeout).
    #[error("summarization backend failed: {0}")]
    Backend(String),

    /// The summary was not smaller than its inputs, violating the contract.
    #[error("summary did not shrink: {summary_tokens} tokens vs {original_tokens} original")]
    NotSmaller {
        summary_tokens: usize,
        original_tokens: usize,
    },
}

/// Compresses a run of units into a single cheaper unit.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `units` (chronological order) into one replacement unit.
    async fn summarize(
        &self,
        units: &[ContextUnit],
        model: &str,
    ) -> Result<ContextUnit, SummarizeError>;
}
