use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chunk, IndexDescriptor, RetrievalResult};

/// Maps text to fixed-dimension vectors. Calls may block on model inference.
pub trait Embedder: Send + Sync {
    /// Stable identifier for the model (e.g. `bert:all-MiniLM-L6-v2:d384`).
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    /// Maximum input length in tokens; longer inputs are truncated.
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()])?;
        out.pop().ok_or_else(|| anyhow::anyhow!("embedder returned no vector").into())
    }
}

/// A similarity-search service holding named indexes.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn list(&self) -> Result<BTreeSet<String>>;
    /// Idempotent; dropping an absent index is a no-op.
    async fn drop_index(&self, name: &str) -> Result<()>;
    /// Creates an empty index. An existing index with the same dimension is
    /// kept; a different dimension is a `DimensionMismatch`.
    async fn create(&self, descriptor: &IndexDescriptor) -> Result<()>;
    async fn describe(&self, name: &str) -> Result<Option<IndexDescriptor>>;
    /// Replaces the full contents of `name`.
    async fn load(&self, name: &str, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<()>;
    async fn search(&self, name: &str, vector: &[f32], k: usize) -> Result<RetrievalResult>;
    async fn count(&self, name: &str) -> Result<usize>;
    /// Records which physical index currently serves the logical `name`.
    async fn set_active(&self, logical: &str, physical: &str) -> Result<()>;
    async fn active(&self, logical: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_output_tokens: usize,
    pub stop: Vec<String>,
}

/// A local language model invoked in echo mode: the returned text is the
/// prompt followed by the completion.
pub trait Generator: Send + Sync {
    fn model_id(&self) -> &str;
    /// Maximum number of tokens (prompt plus completion) the model accepts.
    fn context_window(&self) -> usize;
    fn count_tokens(&self, text: &str) -> Result<usize>;
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}
