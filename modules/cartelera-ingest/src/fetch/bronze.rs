//! Bronze tier: rendered listing pages scraped by selector.
//!
//! The listing is rendered through the headless service (or fetched plain
//! when the page doesn't need JS), cards are extracted with CSS selectors,
//! and detail pages may be re-rendered per item. A failed item is logged and
//! skipped; a failed listing page is fatal for that page.

use scraper::{Html, Selector};
use serde_json::json;
use tracing::{debug, warn};

use cartelera_common::{BronzeSource, IngestError};
use render_client::RenderRequest;

use super::{absolutize, select_attr, select_text, HttpFetcher, RawRecord};

pub async fn fetch_bronze(
    fetcher: &HttpFetcher,
    cfg: &BronzeSource,
    max_pages: usize,
) -> Result<Vec<RawRecord>, IngestError> {
    let pages = page_urls(&cfg.listing_url, max_pages.min(cfg.max_pages));
    let mut records = Vec::new();

    for (index, page_url) in pages.iter().enumerate() {
        let html = match listing_html(fetcher, cfg, page_url).await {
            Ok(html) => html,
            Err(e) if index == 0 => return Err(e),
            Err(e) => {
                // Later pages degrade gracefully; keep what we have.
                warn!(source = %cfg.meta.slug, url = %page_url, error = %e, "listing page failed");
                break;
            }
        };

        let cards = extract_cards(&html, cfg, page_url);
        if cards.is_empty() {
            debug!(source = %cfg.meta.slug, url = %page_url, "no cards on page");
            break;
        }
        records.extend(cards);
    }

    if cfg.fetch_details {
        for record in &mut records {
            let Some(link) = record.get("link").and_then(|l| l.as_str()).map(String::from) else {
                continue;
            };
            match detail_markdown(fetcher, cfg, &link).await {
                Ok(Some(markdown)) => {
                    let existing = record
                        .get("description")
                        .and_then(|d| d.as_str())
                        .map(str::len)
                        .unwrap_or(0);
                    if markdown.len() > existing {
                        if let Some(map) = record.as_object_mut() {
                            map.insert("description".to_string(), json!(markdown));
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(source = %cfg.meta.slug, url = %link, error = %e, "detail render failed, skipping");
                }
            }
        }
    }

    Ok(records)
}

/// Substitute `{page}` in the listing URL; without the placeholder there is a
/// single listing page.
fn page_urls(listing_url: &str, max_pages: usize) -> Vec<String> {
    if listing_url.contains("{page}") {
        (1..=max_pages.max(1))
            .map(|p| listing_url.replace("{page}", &p.to_string()))
            .collect()
    } else {
        vec![listing_url.to_string()]
    }
}

/// Fetch the listing HTML, through the renderer when configured. A partial
/// (empty) render is retried once with a doubled wait before giving up.
async fn listing_html(
    fetcher: &HttpFetcher,
    cfg: &BronzeSource,
    url: &str,
) -> Result<String, IngestError> {
    if !cfg.use_renderer {
        return fetcher.limited_get(url, &[], true).await;
    }

    let renderer = fetcher
        .renderer
        .as_ref()
        .ok_or_else(|| IngestError::Config("bronze source needs RENDER_BASE_URL".to_string()))?;

    let mut request = RenderRequest::html(url);
    if let Some(ref wait_for) = cfg.wait_for {
        request = request.with_wait_for(wait_for);
    }

    fetcher.limiter.acquire(url).await;
    let first = renderer.render(&request).await;

    let rendered = match first {
        Ok(r) if !r.is_empty() => {
            fetcher.limiter.on_success(url).await;
            r
        }
        outcome => {
            if let Err(ref e) = outcome {
                if e.is_rate_limit() {
                    fetcher.limiter.on_rate_limited(url).await;
                }
            }
            // Retry once with a longer wait; slow pages often just need time.
            let retry_request = request.clone().with_timeout_ms(request.timeout * 2);
            fetcher.limiter.acquire(url).await;
            let second = renderer
                .render(&retry_request)
                .await
                .map_err(|e| IngestError::Content(format!("render failed for {url}: {e}")))?;
            if second.is_empty() {
                return Err(IngestError::Content(format!("empty render for {url}")));
            }
            fetcher.limiter.on_success(url).await;
            second
        }
    };

    rendered
        .html
        .or(rendered.markdown)
        .ok_or_else(|| IngestError::Content(format!("render returned no content for {url}")))
}

async fn detail_markdown(
    fetcher: &HttpFetcher,
    cfg: &BronzeSource,
    url: &str,
) -> Result<Option<String>, IngestError> {
    if !cfg.use_renderer {
        return Ok(None);
    }
    let renderer = fetcher
        .renderer
        .as_ref()
        .ok_or_else(|| IngestError::Config("bronze source needs RENDER_BASE_URL".to_string()))?;

    fetcher.limiter.acquire(url).await;
    let rendered = renderer
        .render(&RenderRequest::markdown(url))
        .await
        .map_err(|e| IngestError::Content(format!("render failed for {url}: {e}")))?;
    fetcher.limiter.on_success(url).await;

    Ok(rendered.markdown.filter(|m| !m.trim().is_empty()))
}

/// Pull listing cards out of rendered HTML. Pure, so the selector logic is
/// testable without a renderer.
fn extract_cards(html: &str, cfg: &BronzeSource, page_url: &str) -> Vec<RawRecord> {
    let document = Html::parse_document(html);
    let Ok(card_selector) = Selector::parse(&cfg.card_selector) else {
        warn!(source = %cfg.meta.slug, selector = %cfg.card_selector, "invalid card selector");
        return Vec::new();
    };

    let mut cards = Vec::new();
    for card in document.select(&card_selector) {
        let fragment = Html::parse_fragment(&card.html());

        let title = select_text(&fragment, &cfg.title_selector);
        let date = select_text(&fragment, &cfg.date_selector);
        let link = select_attr(&fragment, &cfg.link_selector, "href")
            .map(|href| absolutize(&href, page_url));
        let image = select_attr(&fragment, &cfg.image_selector, "src")
            .map(|src| absolutize(&src, page_url));

        if title.is_none() {
            continue;
        }

        cards.push(json!({
            "title": title,
            "date": date,
            "link": link,
            "image": image,
            "city": cfg.city,
            "province": cfg.province,
        }));
    }
    cards
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartelera_common::SourceMeta;

    fn config() -> BronzeSource {
        BronzeSource {
            meta: SourceMeta {
                slug: "viralagenda_valladolid".to_string(),
                name: "Viralagenda Valladolid".to_string(),
                region: "Castilla y León".to_string(),
                region_code: "CL".to_string(),
                is_active: true,
            },
            listing_url: "https://example.es/valladolid/eventos".to_string(),
            province: Some("Valladolid".to_string()),
            city: Some("Valladolid".to_string()),
            use_renderer: true,
            wait_for: Some(".evento".to_string()),
            card_selector: ".evento".to_string(),
            title_selector: ".titulo".to_string(),
            date_selector: ".fecha".to_string(),
            link_selector: "a".to_string(),
            image_selector: "img".to_string(),
            fetch_details: false,
            max_pages: 3,
        }
    }

    const LISTING: &str = r#"
        <html><body>
          <div class="evento">
            <span class="titulo">Festa do Marisco</span>
            <span class="fecha">10 de mayo de 2099</span>
            <a href="/eventos/marisco">+info</a>
            <img src="/img/marisco.jpg">
          </div>
          <div class="evento">
            <span class="fecha">sin título</span>
          </div>
        </body></html>
    "#;

    #[test]
    fn cards_extract_with_absolutized_urls() {
        let cfg = config();
        let cards = extract_cards(LISTING, &cfg, "https://example.es/valladolid/eventos");
        // The card without a title is dropped.
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0]["title"], "Festa do Marisco");
        assert_eq!(cards[0]["date"], "10 de mayo de 2099");
        assert_eq!(cards[0]["link"], "https://example.es/eventos/marisco");
        assert_eq!(cards[0]["image"], "https://example.es/img/marisco.jpg");
        assert_eq!(cards[0]["city"], "Valladolid");
    }

    #[test]
    fn page_urls_expand_placeholder() {
        assert_eq!(
            page_urls("https://example.es/eventos?p={page}", 3),
            vec![
                "https://example.es/eventos?p=1",
                "https://example.es/eventos?p=2",
                "https://example.es/eventos?p=3",
            ]
        );
        assert_eq!(page_urls("https://example.es/eventos", 3).len(), 1);
    }
}
