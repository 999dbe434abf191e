//! Transport-specific retrieval.
//!
//! One narrow contract over three adapter variants: Gold speaks paginated
//! JSON APIs, Silver parses feeds, Bronze scrapes rendered pages. The
//! `Fetcher` trait is the seam the pipeline (and its tests) compose against.

pub mod bronze;
pub mod gold;
pub mod silver;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::prelude::IndexedRandom;
use scraper::{Html, Selector};

use cartelera_common::{IngestError, SourceConfig};
use render_client::RenderClient;

use crate::rate_limit::RateLimiter;
use crate::retry::{with_retry, RetryPolicy};

/// A raw provider record, shape-normalized per tier but not yet parsed.
pub type RawRecord = serde_json::Value;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Realistic browser agents rotated for Silver/Bronze plain-HTTP fetches.
/// Gold APIs get a stable, honest tool UA instead.
const BROWSER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

pub const TOOL_AGENT: &str = "Cartelera-EventPipeline/0.1 (+https://cartelera.es)";

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve raw records for a source, respecting source pagination order.
    async fn fetch(
        &self,
        config: &SourceConfig,
        max_pages: usize,
    ) -> Result<Vec<RawRecord>, IngestError>;
}

/// Production fetcher: shared HTTP pool, the per-domain rate limiter, and the
/// rendering service for Bronze sources.
pub struct HttpFetcher {
    pub(crate) http: reqwest::Client,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) retry: RetryPolicy,
    pub(crate) renderer: Option<Arc<RenderClient>>,
}

impl HttpFetcher {
    pub fn new(limiter: Arc<RateLimiter>, renderer: Option<Arc<RenderClient>>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("Failed to build fetcher HTTP client");
        Self {
            http,
            limiter,
            retry: RetryPolicy::default(),
            renderer,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Rate-limited, retried GET returning the response body. The limiter is
    /// consulted before every attempt; 429/403 escalate its backoff level,
    /// successes decay it.
    pub(crate) async fn limited_get(
        &self,
        url: &str,
        query: &[(String, String)],
        browser_like: bool,
    ) -> Result<String, IngestError> {
        with_retry(&self.retry, "http_get", |_attempt| async move {
            self.limiter.acquire(url).await;

            let agent = if browser_like {
                BROWSER_AGENTS
                    .choose(&mut rand::rng())
                    .copied()
                    .unwrap_or(TOOL_AGENT)
            } else {
                TOOL_AGENT
            };

            let mut request = self
                .http
                .get(url)
                .header("User-Agent", agent)
                .header("Accept-Language", "es-ES,es;q=0.9,en;q=0.8");
            if !query.is_empty() {
                request = request.query(query);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    self.limiter.on_rate_limited(url).await;
                    return Err(IngestError::transport(e));
                }
            };

            let status = response.status().as_u16();
            if !(200..300).contains(&status) {
                let message = response.text().await.unwrap_or_default();
                let err = IngestError::from_status(
                    status,
                    &crate::rate_limit::extract_domain(url),
                    message,
                );
                if err.is_rate_limit_signal() {
                    self.limiter.on_rate_limited(url).await;
                }
                return Err(err);
            }

            self.limiter.on_success(url).await;
            response.text().await.map_err(IngestError::transport)
        })
        .await
    }

    pub(crate) async fn limited_get_json(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<serde_json::Value, IngestError> {
        let body = self.limited_get(url, query, false).await?;
        serde_json::from_str(&body)
            .map_err(|e| IngestError::Content(format!("malformed JSON from {url}: {e}")))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        config: &SourceConfig,
        max_pages: usize,
    ) -> Result<Vec<RawRecord>, IngestError> {
        match config {
            SourceConfig::Gold(cfg) => gold::fetch_gold(self, cfg, max_pages).await,
            SourceConfig::Silver(cfg) => silver::fetch_silver(self, cfg).await,
            SourceConfig::Bronze(cfg) => bronze::fetch_bronze(self, cfg, max_pages).await,
        }
    }
}

// --- Selector helpers (shared by Silver detail pages and Bronze cards) ---

/// Text content of the first node matching `selector`, whitespace-squeezed.
pub(crate) fn select_text(fragment: &Html, selector: &str) -> Option<String> {
    let parsed = Selector::parse(selector).ok()?;
    let element = fragment.select(&parsed).next()?;
    let text = element.text().collect::<Vec<_>>().join(" ");
    let squeezed = cartelera_common::text::squeeze_whitespace(&text);
    (!squeezed.is_empty()).then_some(squeezed)
}

/// An attribute of the first node matching `selector`.
pub(crate) fn select_attr(fragment: &Html, selector: &str, attr: &str) -> Option<String> {
    let parsed = Selector::parse(selector).ok()?;
    let element = fragment.select(&parsed).next()?;
    element.value().attr(attr).map(str::to_string)
}

/// Apply a field → selector table to an HTML document. Selectors ending in
/// `@attr` read that attribute instead of the text content.
pub(crate) fn extract_fields(html: &str, selectors: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let document = Html::parse_document(html);
    let mut fields = BTreeMap::new();

    for (field, selector) in selectors {
        let value = match selector.rsplit_once('@') {
            Some((sel, attr)) if !attr.contains(']') => select_attr(&document, sel, attr),
            _ => select_text(&document, selector),
        };
        if let Some(value) = value {
            fields.insert(field.clone(), value);
        }
    }

    fields
}

/// Resolve a possibly relative href against the page it came from.
pub(crate) fn absolutize(href: &str, base: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match url::Url::parse(base).and_then(|b| b.join(href)) {
        Ok(joined) => joined.to_string(),
        Err(_) => href.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_fields_reads_text_and_attrs() {
        let html = r#"
            <div class="evento">
                <h2 class="titulo">Feria  del   Libro</h2>
                <a class="enlace" href="/eventos/feria">ver</a>
                <img class="cartel" src="/img/feria.jpg">
            </div>
        "#;
        let mut selectors = BTreeMap::new();
        selectors.insert("title".to_string(), ".titulo".to_string());
        selectors.insert("link".to_string(), "a.enlace@href".to_string());
        selectors.insert("image".to_string(), "img.cartel@src".to_string());
        selectors.insert("missing".to_string(), ".nope".to_string());

        let fields = extract_fields(html, &selectors);
        assert_eq!(fields.get("title").unwrap(), "Feria del Libro");
        assert_eq!(fields.get("link").unwrap(), "/eventos/feria");
        assert_eq!(fields.get("image").unwrap(), "/img/feria.jpg");
        assert!(!fields.contains_key("missing"));
    }

    #[test]
    fn absolutize_joins_relative_urls() {
        assert_eq!(
            absolutize("/eventos/feria", "https://example.es/agenda/"),
            "https://example.es/eventos/feria"
        );
        assert_eq!(
            absolutize("https://cdn.example.es/a.jpg", "https://example.es"),
            "https://cdn.example.es/a.jpg"
        );
    }
}
