//! # PromptLoom Core
//!
//! Domain types, traits, and error definitions for the PromptLoom context
//! budgeting engine. This crate has **zero framework dependencies** — it
//! defines the data model and collaborator contracts that the other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (token counter, count cache, summarizer) is
//! defined as a trait here. Implementations live in their respective crates.
//! This enables:
//! - Swapping counter backends via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)
//!
//! The engine itself is stateless: each assembly call is a pure function of
//! (candidate units, budget, policy, counter). Units are borrowed from the
//! caller and never mutated — truncation produces new derived units.

pub mod budget;
pub mod counter;
pub mod error;
pub mod manifest;
pub mod summarize;
pub mod unit;

// Re-export key types at crate root for ergonomics
pub use budget::{Budget, SectionName, SectionPolicy};
pub use counter::{CountError, TokenCountCache, TokenCounter};
pub use error::{EngineError, Result};
pub use manifest::{Decision, EvictionReason, Manifest, SectionReport};
pub use summarize::{SummarizeError, Summarizer};
pub use unit::{ContextUnit, UnitId, UnitKind};
