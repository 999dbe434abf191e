//! Seam traits for the model endpoints.
//!
//! The enricher and classifier are written against these so the pipeline can
//! run with stub implementations in tests.

use anyhow::Result;

/// A chat-completion model. `model` names the concrete slot resolved from
/// configuration (ORO/PLATA/BRONCE or the small filter model).
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;
}

/// A text-embedding model. One request per input; the caller truncates.
#[async_trait::async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// No-op embedder for contexts that don't need embeddings.
pub struct NoOpEmbedder;

#[async_trait::async_trait]
impl TextEmbedder for NoOpEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![])
    }
}
