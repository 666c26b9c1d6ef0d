//! Error types for the PromptLoom engine.
//!
//! Uses `thiserror` for ergonomic error definitions. The taxonomy separates
//! fatal caller-facing failures (budget exhaustion) from defect-class
//! internal failures (invariant violations), which carry full diagnostic
//! context and are never silently swallowed.

use thiserror::Error;

use crate::counter::CountError;

/// The top-level error type for all PromptLoom operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Mandatory (fixed-size) sections alone exceed the ceiling minus the
    /// reserved completion margin. Fatal: retrying with the same input
    /// cannot succeed — the caller must reduce mandatory content or raise
    /// the ceiling.
    #[error(
        "fixed sections exceed budget: {fixed_tokens} mandatory tokens, \
         {available} available (ceiling {ceiling} − reserved {reserved_output})"
    )]
    BudgetExhausted {
        fixed_tokens: usize,
        available: usize,
        ceiling: usize,
        reserved_output: usize,
    },

    /// A post-fitting consistency check failed. Programming-error class:
    /// signals a bug in an allocator or fitter, never a normal runtime
    /// condition.
    #[error(
        "assembly invariant violated: {detail} \
         (section budgets: {section_budgets:?}, computed total: {computed_total})"
    )]
    InvariantViolation {
        detail: String,
        section_budgets: Vec<(String, usize)>,
        computed_total: usize,
    },

    /// Token counting failed in a way the engine could not recover from
    /// locally. Per-unit failures are recovered by excluding the unit; this
    /// variant only surfaces wholesale collaborator failure.
    #[error("token counting failed: {0}")]
    Counting(#[from] CountError),

    /// The assembly policy is invalid (zero ceiling, margin ≥ ceiling, ...).
    #[error("invalid policy: {0}")]
    Policy(String),
}

/// Result type alias using our EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;
