//! The embeddings seam and a deterministic in-process implementation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::Result;

/// An embedding model mapping text to dense vectors.
///
/// The production sentence-transformer lives behind this trait; the core
/// never depends on a specific provider.
#[async_trait]
pub trait Embeddings: Send + Sync {
    /// Embed a batch of documents. The output is parallel to the input.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of every vector this model produces.
    fn dimensions(&self) -> usize;
}

/// Deterministic hashed bag-of-words embedder.
///
/// Each lowercased token is hashed into a bucket and the resulting histogram
/// is L2-normalized, so the same text always produces the same vector and
/// texts sharing tokens land near each other. Good enough to exercise
/// nearest-neighbor plumbing without a hosted model.
#[derive(Debug, Clone)]
pub struct MockEmbeddings {
    dimensions: usize,
}

impl MockEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimensions;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embeddings for MockEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
