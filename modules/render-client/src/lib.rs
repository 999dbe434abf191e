pub mod error;

pub use error::{RenderError, Result};

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_TIMEOUT_MS: u32 = 60_000;

/// A browser action performed before the page is captured.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Click { selector: String },
    Wait { milliseconds: u32 },
    Scroll { direction: String },
    Write { selector: String, text: String },
    Press { key: String },
}

/// Request body for the `/scrape` endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub url: String,
    pub formats: Vec<String>,
    pub only_main_content: bool,
    pub timeout: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

impl RenderRequest {
    pub fn markdown(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            formats: vec!["markdown".to_string()],
            only_main_content: true,
            timeout: DEFAULT_TIMEOUT_MS,
            wait_for: None,
            headers: None,
            actions: Vec::new(),
        }
    }

    pub fn html(url: impl Into<String>) -> Self {
        Self {
            formats: vec!["html".to_string()],
            ..Self::markdown(url)
        }
    }

    pub fn with_wait_for(mut self, selector: impl Into<String>) -> Self {
        self.wait_for = Some(selector.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout: u32) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Rendered page content.
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub markdown: Option<String>,
    pub html: Option<String>,
    pub metadata: serde_json::Value,
}

impl Rendered {
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.markdown.as_deref().map_or(true, |m| m.trim().is_empty())
            && self.html.as_deref().map_or(true, |h| h.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    success: Option<bool>,
    data: Option<ApiData>,
    // Flat self-hosted shape
    markdown: Option<String>,
    content: Option<String>,
    metadata: Option<serde_json::Value>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    markdown: Option<String>,
    html: Option<String>,
    metadata: Option<serde_json::Value>,
}

/// Client for the rendering service. One instance per process; the inner
/// reqwest client pools connections.
pub struct RenderClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RenderClient {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to build render HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(String::from),
        }
    }

    /// Render a page and return its captured content.
    pub async fn render(&self, request: &RenderRequest) -> Result<Rendered> {
        let endpoint = format!("{}/scrape", self.base_url);

        debug!(url = %request.url, wait_for = ?request.wait_for, "render request");

        let mut req = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RenderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope = resp.json().await?;

        // Cloud shape: {"success": true, "data": {...}}
        if envelope.success == Some(true) {
            if let Some(data) = envelope.data {
                return Ok(Rendered {
                    markdown: data.markdown,
                    html: data.html,
                    metadata: data.metadata.unwrap_or_default(),
                });
            }
        }

        // Self-hosted flat shape: content is HTML, markdown may coexist.
        if envelope.markdown.is_some() || envelope.content.is_some() {
            return Ok(Rendered {
                markdown: envelope.markdown.or_else(|| envelope.content.clone()),
                html: envelope.content,
                metadata: envelope.metadata.unwrap_or_default(),
            });
        }

        Err(RenderError::Failed(
            envelope
                .error
                .unwrap_or_else(|| "unknown response shape".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_camel_case() {
        let req = RenderRequest::markdown("https://example.es/agenda")
            .with_wait_for(".event-card")
            .with_timeout_ms(30_000);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["waitFor"], ".event-card");
        assert_eq!(json["onlyMainContent"], true);
        assert_eq!(json["timeout"], 30_000);
        assert!(json.get("actions").is_none());
    }

    #[test]
    fn actions_serialize_tagged() {
        let mut req = RenderRequest::markdown("https://example.es");
        req.actions = vec![
            Action::Click {
                selector: "button.load-more".to_string(),
            },
            Action::Wait { milliseconds: 2000 },
        ];
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["actions"][0]["type"], "click");
        assert_eq!(json["actions"][1]["milliseconds"], 2000);
    }

    #[test]
    fn rendered_empty_detection() {
        assert!(Rendered::default().is_empty());
        let r = Rendered {
            markdown: Some("# Agenda".to_string()),
            ..Default::default()
        };
        assert!(!r.is_empty());
    }
}
