/// Embedder trait and shared types for text embedding.
///
/// The embedding model is an external collaborator called as a black box.
/// Implementations are synchronous and may be slow; callers keep them off
/// the read path (only the crawl/update pipelines embed, plus search mode's
/// single query embedding, which runs under its own timeout).
pub mod mock;
pub mod openai;

use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding request failed: {0}")]
    RequestFailed(String),

    #[error("malformed embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding dimension mismatch: got {got}, expected {expected}")]
    DimensionMismatch { got: usize, expected: usize },
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}
