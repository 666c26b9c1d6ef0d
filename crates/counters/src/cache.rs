//! Shared token-count cache.
//!
//! Counting can be expensive (remote tokenizer service, large content), and
//! the same content recurs across assembly calls for one conversation. The
//! cache is keyed by (model, sha256 of content) so a model-version change
//! can be invalidated per model without touching other entries.
//!
//! Read-mostly discipline: concurrent reads take the shared lock; a lost
//! fill race overwrites with the identical value, so last-write-wins is
//! safe and cheap.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use promptloom_core::{CountError, TokenCountCache, TokenCounter};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Hex sha256 of content, the cache key component.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Thread-safe in-process count cache.
#[derive(Default)]
pub struct SharedCountCache {
    entries: RwLock<HashMap<(String, String), usize>>,
}

impl SharedCountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries across all models.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenCountCache for SharedCountCache {
    fn get(&self, model: &str, content_hash: &str) -> Option<usize> {
        self.entries
            .read()
            .unwrap()
            .get(&(model.to_string(), content_hash.to_string()))
            .copied()
    }

    fn put(&self, model: &str, content_hash: &str, count: usize) {
        self.entries
            .write()
            .unwrap()
            .insert((model.to_string(), content_hash.to_string()), count);
    }

    fn invalidate_model(&self, model: &str) {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|(m, _), _| m != model);
        debug!(
            model,
            removed = before - entries.len(),
            "Invalidated cached token counts"
        );
    }
}

/// Decorator that consults a [`TokenCountCache`] before delegating to the
/// wrapped counter.
pub struct CachedCounter<C> {
    inner: C,
    cache: Arc<dyn TokenCountCache>,
}

impl<C: TokenCounter> CachedCounter<C> {
    pub fn new(inner: C, cache: Arc<dyn TokenCountCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<C: TokenCounter> TokenCounter for CachedCounter<C> {
    async fn count(&self, content: &str, model: &str) -> Result<usize, CountError> {
        let hash = content_hash(content);
        if let Some(cached) = self.cache.get(model, &hash) {
            return Ok(cached);
        }
        let count = self.inner.count(content, model).await?;
        self.cache.put(model, &hash, count);
        Ok(count)
    }

    fn unit_overhead(&self) -> usize {
        self.inner.unit_overhead()
    }
}
