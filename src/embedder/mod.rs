/// Embedder trait and shared types for text embedding.
///
/// The production implementation calls an external embedding API; the
/// mock produces deterministic vectors for tests and offline runs.
pub mod mock;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding request failed: {0}")]
    RequestFailed(String),

    #[error("embedding provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("embedding response malformed: {0}")]
    MalformedResponse(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Name of the embedding model, recorded once per corpus.
    fn model(&self) -> &str;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}
