//! Exact token counting via HuggingFace `tokenizers`.
//!
//! Each model identifier maps to a tokenizer file registered up front;
//! counting an unregistered model is a backend error rather than a silent
//! fall-back to estimation, so callers notice misconfiguration immediately.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use promptloom_core::{CountError, TokenCounter};
use tokenizers::Tokenizer;

/// Exact counter backed by per-model tokenizer files.
pub struct HfCounter {
    tokenizers: HashMap<String, Tokenizer>,
    unit_overhead: usize,
}

impl HfCounter {
    pub fn new() -> Self {
        Self {
            tokenizers: HashMap::new(),
            unit_overhead: 4,
        }
    }

    /// Register a tokenizer file (tokenizer.json) for a model identifier.
    pub fn register(
        mut self,
        model: impl Into<String>,
        tokenizer_file: impl AsRef<Path>,
    ) -> Result<Self, CountError> {
        let tokenizer = Tokenizer::from_file(tokenizer_file.as_ref())
            .map_err(|e| CountError::Backend(format!("failed to load tokenizer: {e}")))?;
        self.tokenizers.insert(model.into(), tokenizer);
        Ok(self)
    }

    /// Which models this counter can price exactly.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.tokenizers.keys().map(String::as_str)
    }
}

impl Default for HfCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCounter for HfCounter {
    async fn count(&self, content: &str, model: &str) -> Result<usize, CountError> {
        let tokenizer = self.tokenizers.get(model).ok_or_else(|| {
            CountError::Backend(format!("no tokenizer registered for model '{model}'"))
        })?;
        let encoding = tokenizer
            .encode(content, false)
            .map_err(|e| CountError::Untokenizable {
                reason: e.to_string(),
            })?;
        Ok(encoding.get_ids().len())
    }

    fn unit_overhead(&self) -> usize {
        self.unit_overhead
    }
}
