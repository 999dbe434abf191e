//! Wrappers binding the shared model-endpoint clients to the pipeline's
//! seam traits.

use anyhow::Result;

use ai_client::OpenAi;
use cartelera_common::{ChatModel, Config, TextEmbedder};

/// Chat completions over the configured OpenAI-compatible endpoint.
pub struct ChatEndpoint {
    client: OpenAi,
}

impl ChatEndpoint {
    pub fn new(config: &Config) -> Self {
        let client = OpenAi::new(&config.model_api_key).with_base_url(&config.model_api_url);
        Self { client }
    }
}

#[async_trait::async_trait]
impl ChatModel for ChatEndpoint {
    async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let completion = self
            .client
            .complete(model, system, user, temperature, max_tokens)
            .await?;
        Ok(completion.content)
    }
}

/// Embeddings over the configured endpoint. One request per input; 1024-dim
/// vectors.
pub struct EmbeddingEndpoint {
    client: OpenAi,
}

impl EmbeddingEndpoint {
    pub fn new(config: &Config) -> Self {
        let client = OpenAi::new(&config.model_api_key)
            .with_base_url(&config.embedding_api_url)
            .with_embedding_model(&config.embedding_model);
        Self { client }
    }
}

#[async_trait::async_trait]
impl TextEmbedder for EmbeddingEndpoint {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(text).await
    }
}
