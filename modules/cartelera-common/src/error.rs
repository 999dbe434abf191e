use thiserror::Error;

/// Pipeline error taxonomy. Stage boundaries convert recoverable failures
/// into per-record counts; only `Config` and infrastructure-level failures
/// unwind a whole source run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited by {domain} (HTTP {status})")]
    RateLimited { domain: String, status: u16 },

    #[error("Remote server error (HTTP {status}): {message}")]
    RemoteServer { status: u16, message: String },

    #[error("Client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    #[error("Content error: {0}")]
    Content(String),

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IngestError {
    /// Retryable under the backoff policy: transport failures, rate-limit
    /// signals, and 5xx. Other 4xx, content, and config errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Transport(_)
                | IngestError::RateLimited { .. }
                | IngestError::RemoteServer { .. }
        )
    }

    /// Signals that should escalate the per-domain backoff level.
    pub fn is_rate_limit_signal(&self) -> bool {
        matches!(self, IngestError::RateLimited { .. })
    }

    /// Classify an HTTP status into the taxonomy.
    pub fn from_status(status: u16, domain: &str, message: String) -> Self {
        match status {
            429 | 403 => IngestError::RateLimited {
                domain: domain.to_string(),
                status,
            },
            500..=599 => IngestError::RemoteServer { status, message },
            _ => IngestError::Client { status, message },
        }
    }
}

impl IngestError {
    /// Wrap a transport-layer failure (connect, DNS, read timeout).
    pub fn transport(err: impl std::fmt::Display) -> Self {
        IngestError::Transport(err.to_string())
    }
}
