//! TokenCounter trait — the abstraction over tokenizer backends.
//!
//! A counter knows how to price a piece of content in tokens for a given
//! model. Counting may be remote (a network-backed tokenizer service), hence
//! the async contract; dropping an in-flight assembly future between counts
//! is a clean cancellation because the engine holds no external resources.
//!
//! The contract deliberately does NOT assume monotonicity under
//! concatenation — tokenizers may merge adjacent tokens across a join point.
//! The engine re-counts whenever content is truncated or merged, never
//! sum-then-assume.

use async_trait::async_trait;
use thiserror::Error;

use crate::unit::ContextUnit;

/// A unit could not be priced in tokens.
#[derive(Debug, Clone, Error)]
pub enum CountError {
    /// The content cannot be tokenized at all (e.g. unsupported modality).
    #[error("content cannot be tokenized: {reason}")]
    Untokenizable { reason: String },

    /// The counting backend itself failed (network, missing tokenizer file).
    #[error("token counting backend failed: {0}")]
    Backend(String),
}

/// The core counting contract.
///
/// Deterministic for a given model identifier: the same content must always
/// yield the same count. Implementations: character heuristic, HuggingFace
/// tokenizers, remote counting services.
#[async_trait]
pub trait TokenCounter: Send + Sync {
    /// Count tokens for raw content under the given model.
    async fn count(&self, content: &str, model: &str) -> Result<usize, CountError>;

    /// Per-unit wire overhead (role name, delimiters, formatting markers in
    /// the chat-completion wire format).
    fn unit_overhead(&self) -> usize {
        4
    }

    /// Count a whole unit: content tokens plus wire overhead.
    async fn count_unit(&self, unit: &ContextUnit, model: &str) -> Result<usize, CountError> {
        Ok(self.count(&unit.content, model).await? + self.unit_overhead())
    }
}

/// An injectable cache of token counts, keyed by (model, content hash).
///
/// Explicitly a collaborator with a defined lifecycle — never hidden global
/// state. Read-mostly: concurrent reads are the common case, and a lost
/// fill race merely recomputes, which is safe and cheap. Callers must
/// invalidate a model's entries when its tokenizer version changes.
pub trait TokenCountCache: Send + Sync {
    /// Look up a cached count.
    fn get(&self, model: &str, content_hash: &str) -> Option<usize>;

    /// Store a count. Last write wins on races.
    fn put(&self, model: &str, content_hash: &str, count: usize);

    /// Drop every entry for one model (tokenizer version changed).
    fn invalidate_model(&self, model: &str);
}
