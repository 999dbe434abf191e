use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Render API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Render failed: {0}")]
    Failed(String),
}

impl RenderError {
    /// Rate-limit and upstream-block signals the caller should back off on.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, RenderError::Api { status: 429 | 403, .. })
    }
}
