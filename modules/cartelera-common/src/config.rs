use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Chat models (OpenAI-compatible endpoint)
    pub model_api_url: String,
    pub model_api_key: String,
    pub model_oro: String,
    pub model_plata: String,
    pub model_bronce: String,
    pub model_filter: String,

    // Embeddings
    pub embedding_api_url: String,
    pub embedding_model: String,

    // Image providers
    pub unsplash_access_key: String,
    pub pexels_api_key: String,

    // Geocoding
    pub geocoder_user_agent: String,

    // Rendering service
    pub render_base_url: String,
    pub render_api_key: String,

    // Persistence
    pub database_url: String,

    // Local cache artifacts
    pub cache_dir: String,
}

impl Config {
    /// Load configuration for a pipeline run.
    /// Panics with a clear message if required vars are missing; this is the
    /// fail-fast path before any network activity.
    pub fn from_env() -> Self {
        Self {
            model_api_url: env::var("MODEL_API_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
            model_api_key: required_env("MODEL_API_KEY"),
            model_oro: env::var("MODEL_ORO").unwrap_or_else(|_| "gpt-oss-120b".to_string()),
            model_plata: env::var("MODEL_PLATA")
                .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            model_bronce: env::var("MODEL_BRONCE").unwrap_or_else(|_| "kimi-k2".to_string()),
            model_filter: env::var("MODEL_FILTER")
                .unwrap_or_else(|_| "llama-3.1-8b-instant".to_string()),
            embedding_api_url: required_env("EMBEDDING_API_URL"),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "bge-m3".to_string()),
            unsplash_access_key: env::var("UNSPLASH_ACCESS_KEY").unwrap_or_default(),
            pexels_api_key: env::var("PEXELS_API_KEY").unwrap_or_default(),
            geocoder_user_agent: env::var("GEOCODER_USER_AGENT")
                .unwrap_or_else(|_| "Cartelera-EventPipeline/0.1".to_string()),
            render_base_url: env::var("RENDER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3002".to_string()),
            render_api_key: env::var("RENDER_API_KEY").unwrap_or_default(),
            database_url: required_env("DATABASE_URL"),
            cache_dir: env::var("CARTELERA_CACHE_DIR").unwrap_or_else(|_| ".cache".to_string()),
        }
    }

    /// Config for listing sources; no secrets required.
    pub fn offline() -> Self {
        Self {
            model_api_url: String::new(),
            model_api_key: String::new(),
            model_oro: String::new(),
            model_plata: String::new(),
            model_bronce: String::new(),
            model_filter: String::new(),
            embedding_api_url: String::new(),
            embedding_model: String::new(),
            unsplash_access_key: String::new(),
            pexels_api_key: String::new(),
            geocoder_user_agent: String::new(),
            render_base_url: String::new(),
            render_api_key: String::new(),
            database_url: String::new(),
            cache_dir: ".cache".to_string(),
        }
    }

    /// Resolve a model slot to its configured model name.
    pub fn model_for_slot(&self, slot: crate::vocab::ModelSlot) -> &str {
        match slot {
            crate::vocab::ModelSlot::Oro => &self.model_oro,
            crate::vocab::ModelSlot::Plata => &self.model_plata,
            crate::vocab::ModelSlot::Bronce => &self.model_bronce,
            crate::vocab::ModelSlot::Filter => &self.model_filter,
        }
    }

    /// Log lengths of sensitive values instead of the values themselves.
    pub fn log_redacted(&self) {
        let vars = [
            ("MODEL_API_KEY", &self.model_api_key),
            ("UNSPLASH_ACCESS_KEY", &self.unsplash_access_key),
            ("PEXELS_API_KEY", &self.pexels_api_key),
            ("RENDER_API_KEY", &self.render_api_key),
            ("DATABASE_URL", &self.database_url),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
