//! Memoizing wrapper around an embedding provider.
//!
//! Re-ingesting a document re-embeds mostly identical chunks; caching by
//! text keeps that cheap and keeps repeated queries deterministic even for
//! providers with nondeterministic backends.

use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use super::EmbeddingProvider;
use crate::error::ProviderError;

/// Caches `text → vector` lookups in front of any [`EmbeddingProvider`].
pub struct CachedEmbedding<P> {
    inner: P,
    entries: RwLock<FxHashMap<String, Vec<f32>>>,
}

impl<P: EmbeddingProvider> CachedEmbedding<P> {
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    /// Number of cached texts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("embedding cache poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, text: &str) -> Option<Vec<f32>> {
        self.entries
            .read()
            .expect("embedding cache poisoned")
            .get(text)
            .cloned()
    }

    fn store(&self, text: &str, vector: &[f32]) {
        self.entries
            .write()
            .expect("embedding cache poisoned")
            .insert(text.to_string(), vector.to_vec());
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbedding<P> {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if let Some(hit) = self.lookup(text) {
            return Ok(hit);
        }
        let vector = self.inner.embed_one(text).await?;
        self.store(text, &vector);
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut results: Vec<Option<Vec<f32>>> = texts.iter().map(|t| self.lookup(t)).collect();
        let missing: Vec<String> = texts
            .iter()
            .zip(&results)
            .filter(|(_, hit)| hit.is_none())
            .map(|(text, _)| text.clone())
            .collect();

        if !missing.is_empty() {
            let fresh = self.inner.embed_batch(&missing).await?;
            let mut fresh_iter = fresh.into_iter();
            for (text, slot) in texts.iter().zip(results.iter_mut()) {
                if slot.is_none() {
                    let vector = fresh_iter
                        .next()
                        .ok_or_else(|| ProviderError::MalformedAnswer {
                            provider: "embedding-cache",
                            message: "batch returned fewer vectors than requested".to_string(),
                        })?;
                    self.store(text, &vector);
                    *slot = Some(vector);
                }
            }
        }

        Ok(results.into_iter().map(|v| v.expect("slot filled")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockEmbeddingProvider;

    #[tokio::test]
    async fn second_lookup_hits_the_cache() {
        let cached = CachedEmbedding::new(MockEmbeddingProvider::default());
        let first = cached.embed_one("engine coverage").await.unwrap();
        assert_eq!(cached.len(), 1);
        let second = cached.embed_one("engine coverage").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn batch_mixes_cached_and_fresh_in_order() {
        let cached = CachedEmbedding::new(MockEmbeddingProvider::default());
        cached.embed_one("alpha").await.unwrap();
        let batch = cached
            .embed_batch(&["alpha".into(), "beta".into(), "alpha".into()])
            .await
            .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], batch[2]);
        assert_eq!(cached.len(), 2);
    }
}
