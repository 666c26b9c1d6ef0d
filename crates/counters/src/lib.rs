//! Token counter implementations for PromptLoom.
//!
//! The engine depends only on the [`promptloom_core::TokenCounter`] contract;
//! this crate provides the backends:
//!
//! - [`HeuristicCounter`] — chars/4 estimation, no dependencies, infallible
//! - [`SharedCountCache`] / [`CachedCounter`] — read-mostly count cache keyed
//!   by (model, content hash), with per-model invalidation
//! - `HfCounter` (feature `hf`) — exact counts via HuggingFace `tokenizers`

pub mod cache;
pub mod heuristic;

#[cfg(feature = "hf")]
pub mod hf;

pub use cache::{CachedCounter, SharedCountCache, content_hash};
pub use heuristic::HeuristicCounter;

#[cfg(feature = "hf")]
pub use hf::HfCounter;
