use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Quality tier of a source. Selects the fetcher style and the enrichment
/// model slot (ORO/PLATA/BRONCE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Gold,
    Silver,
    Bronze,
}

impl std::fmt::Display for SourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceTier::Gold => write!(f, "gold"),
            SourceTier::Silver => write!(f, "silver"),
            SourceTier::Bronze => write!(f, "bronze"),
        }
    }
}

impl std::str::FromStr for SourceTier {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gold" => Ok(Self::Gold),
            "silver" => Ok(Self::Silver),
            "bronze" => Ok(Self::Bronze),
            other => Err(format!("unknown SourceTier: {other}")),
        }
    }
}

/// Pagination strategy for Gold JSON APIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Pagination {
    #[default]
    None,
    /// Loop incrementing `offset` by `page_size` until a short page or the
    /// reported total count is reached.
    OffsetLimit,
    /// Loop incrementing a page index until an empty page or the reported
    /// total-pages value.
    Page,
    /// Offset + limit with Socrata parameter names (`$offset`, `$limit`).
    Socrata,
}

/// Feed flavor for Silver sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    #[default]
    Rss,
    Atom,
    Ical,
}

/// Fields shared by every source config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMeta {
    /// Short lowercase identifier, globally unique within the registry.
    pub slug: String,
    pub name: String,
    /// Comunidad autónoma this source covers.
    pub region: String,
    pub region_code: String,
    pub is_active: bool,
}

/// A Gold source: a clean JSON API with a declarative field mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldSource {
    pub meta: SourceMeta,
    pub url: String,
    pub pagination: Pagination,
    pub page_size: usize,
    pub offset_param: String,
    pub limit_param: String,
    pub page_param: String,
    /// Dotted path to the items array; empty means the response root is it.
    pub items_path: String,
    pub total_count_path: String,
    pub total_pages_path: String,
    /// Source field (dotted path into a raw item) -> event field name.
    pub field_mappings: BTreeMap<String, String>,
    pub default_province: Option<String>,
    pub date_format: String,
    pub datetime_format: String,
    /// Value of the price field that marks the event as free.
    pub free_value: Option<String>,
    /// Separate boolean field carrying is_free, when the API has one.
    pub free_field: Option<String>,
    /// Prepended to relative image URLs.
    pub image_url_prefix: String,
}

impl GoldSource {
    /// A config with the common defaults; callers override what differs.
    pub fn new(meta: SourceMeta, url: impl Into<String>) -> Self {
        Self {
            meta,
            url: url.into(),
            pagination: Pagination::None,
            page_size: 100,
            offset_param: "offset".to_string(),
            limit_param: "limit".to_string(),
            page_param: "_page".to_string(),
            items_path: String::new(),
            total_count_path: String::new(),
            total_pages_path: String::new(),
            field_mappings: BTreeMap::new(),
            default_province: None,
            date_format: "%Y-%m-%d".to_string(),
            datetime_format: "%Y-%m-%dT%H:%M:%SZ".to_string(),
            free_value: Some("Gratuito".to_string()),
            free_field: None,
            image_url_prefix: String::new(),
        }
    }
}

/// A Silver source: a standard feed, optionally followed by detail fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilverSource {
    pub meta: SourceMeta,
    pub url: String,
    pub feed_kind: FeedKind,
    pub fetch_details: bool,
    /// CSS selectors applied to detail pages, event field name -> selector.
    pub field_selectors: BTreeMap<String, String>,
}

/// A Bronze source: a rendered listing page scraped by selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BronzeSource {
    pub meta: SourceMeta,
    pub listing_url: String,
    pub province: Option<String>,
    pub city: Option<String>,
    /// Render through the headless service rather than plain HTTP.
    pub use_renderer: bool,
    /// CSS selector the renderer waits for before capturing.
    pub wait_for: Option<String>,
    pub card_selector: String,
    pub title_selector: String,
    pub date_selector: String,
    pub link_selector: String,
    pub image_selector: String,
    pub fetch_details: bool,
    pub max_pages: usize,
}

/// Tagged variant over the three tiers. Fetcher and parser dispatch on this;
/// no inheritance hierarchy needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum SourceConfig {
    Gold(GoldSource),
    Silver(SilverSource),
    Bronze(BronzeSource),
}

impl SourceConfig {
    pub fn meta(&self) -> &SourceMeta {
        match self {
            SourceConfig::Gold(s) => &s.meta,
            SourceConfig::Silver(s) => &s.meta,
            SourceConfig::Bronze(s) => &s.meta,
        }
    }

    pub fn slug(&self) -> &str {
        &self.meta().slug
    }

    pub fn tier(&self) -> SourceTier {
        match self {
            SourceConfig::Gold(_) => SourceTier::Gold,
            SourceConfig::Silver(_) => SourceTier::Silver,
            SourceConfig::Bronze(_) => SourceTier::Bronze,
        }
    }

    pub fn is_active(&self) -> bool {
        self.meta().is_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(slug: &str) -> SourceMeta {
        SourceMeta {
            slug: slug.to_string(),
            name: slug.to_string(),
            region: "Comunidad de Madrid".to_string(),
            region_code: "MD".to_string(),
            is_active: true,
        }
    }

    #[test]
    fn tier_roundtrip() {
        for t in [SourceTier::Gold, SourceTier::Silver, SourceTier::Bronze] {
            let parsed: SourceTier = t.to_string().parse().unwrap();
            assert_eq!(parsed, t);
        }
        assert!("platinum".parse::<SourceTier>().is_err());
    }

    #[test]
    fn config_tier_matches_variant() {
        let gold = SourceConfig::Gold(GoldSource::new(meta("a"), "https://example.es/api"));
        assert_eq!(gold.tier(), SourceTier::Gold);
        assert_eq!(gold.slug(), "a");
    }

    #[test]
    fn gold_defaults() {
        let g = GoldSource::new(meta("m"), "https://example.es/api");
        assert_eq!(g.pagination, Pagination::None);
        assert_eq!(g.page_size, 100);
        assert_eq!(g.free_value.as_deref(), Some("Gratuito"));
    }
}
