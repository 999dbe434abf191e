//! Image resolution.
//!
//! Every event surfaces one image URL. Cascade: keep the source-provided
//! image, then the primary provider, then the secondary, then a curated
//! static set indexed by primary category. A persistent cache of used URLs
//! prevents the same photo fronting half the agenda.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::prelude::IndexedRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cartelera_common::text::fingerprint;
use cartelera_common::EventDraft;

const RESULTS_PER_QUERY: usize = 15;

// --- Provider seam ---

/// One hit from an image search provider.
#[derive(Debug, Clone)]
pub struct ImageHit {
    pub url: String,
    pub url_small: Option<String>,
    pub url_thumb: Option<String>,
    pub author: Option<String>,
    pub author_url: Option<String>,
    pub source_url: Option<String>,
    pub provider: &'static str,
}

impl ImageHit {
    pub fn attribution(&self) -> Option<String> {
        self.author
            .as_ref()
            .map(|author| format!("Photo by {author} on {}", self.provider))
    }
}

#[async_trait]
pub trait ImageSearcher: Send + Sync {
    async fn search(&self, keywords: &[String], per_page: usize) -> Result<Vec<ImageHit>>;
    fn name(&self) -> &'static str;
}

// --- Providers ---

/// Primary provider (Unsplash-shaped API, Client-ID auth).
pub struct UnsplashSearcher {
    http: reqwest::Client,
    access_key: String,
    api_url: String,
}

impl UnsplashSearcher {
    pub fn new(access_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_key: access_key.to_string(),
            api_url: "https://api.unsplash.com/search/photos".to_string(),
        }
    }
}

#[async_trait]
impl ImageSearcher for UnsplashSearcher {
    async fn search(&self, keywords: &[String], per_page: usize) -> Result<Vec<ImageHit>> {
        let query = keywords.join(" ");
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("query", query.as_str()),
                ("per_page", &per_page.min(30).to_string()),
                ("orientation", "landscape"),
                ("content_filter", "high"),
            ])
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .send()
            .await?;

        if response.status().as_u16() == 403 {
            warn!(provider = "unsplash", "rate limited");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            warn!(provider = "unsplash", status = response.status().as_u16(), "search failed");
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response.json().await?;
        let hits = body["results"]
            .as_array()
            .map(|photos| {
                photos
                    .iter()
                    .filter_map(|photo| {
                        let url = photo["urls"]["regular"].as_str()?.to_string();
                        Some(ImageHit {
                            url,
                            url_small: photo["urls"]["small"].as_str().map(String::from),
                            url_thumb: photo["urls"]["thumb"].as_str().map(String::from),
                            author: photo["user"]["name"].as_str().map(String::from),
                            author_url: photo["user"]["links"]["html"].as_str().map(String::from),
                            source_url: photo["links"]["html"].as_str().map(String::from),
                            provider: "unsplash",
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }

    fn name(&self) -> &'static str {
        "unsplash"
    }
}

/// Secondary provider (Pexels-shaped API, plain header auth).
pub struct PexelsSearcher {
    http: reqwest::Client,
    api_key: String,
    api_url: String,
}

impl PexelsSearcher {
    pub fn new(api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            api_url: "https://api.pexels.com/v1/search".to_string(),
        }
    }
}

#[async_trait]
impl ImageSearcher for PexelsSearcher {
    async fn search(&self, keywords: &[String], per_page: usize) -> Result<Vec<ImageHit>> {
        let query = keywords.join(" ");
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("query", query.as_str()),
                ("per_page", &per_page.min(80).to_string()),
                ("orientation", "landscape"),
            ])
            .header("Authorization", &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(provider = "pexels", status = response.status().as_u16(), "search failed");
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response.json().await?;
        let hits = body["photos"]
            .as_array()
            .map(|photos| {
                photos
                    .iter()
                    .filter_map(|photo| {
                        let src = &photo["src"];
                        let url = src["large"]
                            .as_str()
                            .or_else(|| src["original"].as_str())?
                            .to_string();
                        Some(ImageHit {
                            url,
                            url_small: src["medium"].as_str().map(String::from),
                            url_thumb: src["small"].as_str().map(String::from),
                            author: photo["photographer"].as_str().map(String::from),
                            author_url: photo["photographer_url"].as_str().map(String::from),
                            source_url: photo["url"].as_str().map(String::from),
                            provider: "pexels",
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }

    fn name(&self) -> &'static str {
        "pexels"
    }
}

// --- Dedup cache ---

#[derive(Serialize, Deserialize, Default)]
struct CacheFile {
    used_urls: Vec<String>,
    keyword_to_urls: BTreeMap<String, Vec<String>>,
}

/// Persistent record of which URLs have been assigned, and which URLs each
/// keyword set has already produced. Single writer per run.
pub struct ImageCache {
    used: HashSet<String>,
    by_keywords: BTreeMap<String, Vec<String>>,
    path: Option<PathBuf>,
}

impl ImageCache {
    pub fn in_memory() -> Self {
        Self {
            used: HashSet::new(),
            by_keywords: BTreeMap::new(),
            path: None,
        }
    }

    pub fn load(cache_dir: impl AsRef<Path>) -> Self {
        let path = cache_dir.as_ref().join("used_images.json");
        let mut cache = Self {
            used: HashSet::new(),
            by_keywords: BTreeMap::new(),
            path: Some(path.clone()),
        };
        if let Ok(data) = std::fs::read_to_string(&path) {
            if let Ok(file) = serde_json::from_str::<CacheFile>(&data) {
                cache.used = file.used_urls.into_iter().collect();
                cache.by_keywords = file.keyword_to_urls;
                debug!(count = cache.used.len(), "image cache loaded");
            }
        }
        cache
    }

    fn keyword_key(keywords: &[String]) -> String {
        let mut parts: Vec<String> = keywords.iter().map(|k| k.trim().to_lowercase()).collect();
        parts.sort();
        format!("{:016x}", fingerprint(&parts.join("_")))
    }

    pub fn is_used(&self, url: &str) -> bool {
        self.used.contains(url)
    }

    pub fn mark_used(&mut self, url: &str, keywords: &[String]) {
        self.used.insert(url.to_string());
        if !keywords.is_empty() {
            let key = Self::keyword_key(keywords);
            let urls = self.by_keywords.entry(key).or_default();
            if !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
        self.save();
    }

    /// Random unused URL from the candidates, or None when exhausted.
    pub fn pick_unused(&self, urls: &[String]) -> Option<String> {
        let available: Vec<&String> = urls.iter().filter(|u| !self.is_used(u)).collect();
        available.choose(&mut rand::rng()).map(|u| (*u).clone())
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Write temp, rename. A crash mid-save never corrupts the artifact.
    fn save(&self) {
        let Some(path) = &self.path else { return };
        let file = CacheFile {
            used_urls: self.used.iter().cloned().collect(),
            keyword_to_urls: self.by_keywords.clone(),
        };
        let result = (|| -> Result<()> {
            let dir = path.parent().context("cache path has no parent")?;
            std::fs::create_dir_all(dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            serde_json::to_writer(&mut tmp, &file)?;
            tmp.persist(path)?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!(error = %e, "failed to persist image cache");
        }
    }
}

// --- Fallback set ---

/// Curated static images by primary category, rotated per category so
/// consecutive fallback assignments differ.
const FALLBACK_IMAGES: &[(&str, &[&str])] = &[
    (
        "cultural",
        &[
            "https://images.unsplash.com/photo-1514525253161-7a46d19cd819?w=800",
            "https://images.unsplash.com/photo-1493225457124-a3eb161ffa5f?w=800",
            "https://images.unsplash.com/photo-1501281668745-f7f57925c138?w=800",
        ],
    ),
    (
        "social",
        &[
            "https://images.unsplash.com/photo-1529156069898-49953e39b3ac?w=800",
            "https://images.unsplash.com/photo-1511632765486-a01980e01a18?w=800",
        ],
    ),
    (
        "economica",
        &[
            "https://images.unsplash.com/photo-1454165804606-c3d57bc86b40?w=800",
            "https://images.unsplash.com/photo-1507003211169-0a1dd7228f2d?w=800",
        ],
    ),
    (
        "politica",
        &[
            "https://images.unsplash.com/photo-1529107386315-e1a2ed48a620?w=800",
            "https://images.unsplash.com/photo-1555848962-6e79363ec58f?w=800",
        ],
    ),
    (
        "sanitaria",
        &[
            "https://images.unsplash.com/photo-1544367567-0f2fcb009e0b?w=800",
            "https://images.unsplash.com/photo-1571019613454-1cb2f99b2d8b?w=800",
        ],
    ),
    (
        "tecnologia",
        &[
            "https://images.unsplash.com/photo-1518770660439-4636190af475?w=800",
            "https://images.unsplash.com/photo-1488590528505-98d2b5aba04b?w=800",
        ],
    ),
    (
        "default",
        &[
            "https://images.unsplash.com/photo-1492684223066-81342ee5ff30?w=800",
            "https://images.unsplash.com/photo-1540575467063-178a50c2df87?w=800",
            "https://images.unsplash.com/photo-1505373877841-8d25f7d46678?w=800",
        ],
    ),
];

fn fallback_set(category: &str) -> &'static [&'static str] {
    FALLBACK_IMAGES
        .iter()
        .find(|(slug, _)| *slug == category)
        .or_else(|| FALLBACK_IMAGES.iter().find(|(slug, _)| *slug == "default"))
        .map(|(_, urls)| *urls)
        .unwrap_or(&[])
}

// --- Resolver ---

pub struct ImageResolver {
    primary: Option<Box<dyn ImageSearcher>>,
    secondary: Option<Box<dyn ImageSearcher>>,
    cache: Mutex<ImageCache>,
    fallback_index: Mutex<HashMap<String, usize>>,
}

impl ImageResolver {
    pub fn new(
        primary: Option<Box<dyn ImageSearcher>>,
        secondary: Option<Box<dyn ImageSearcher>>,
        cache: ImageCache,
    ) -> Self {
        Self {
            primary,
            secondary,
            cache: Mutex::new(cache),
            fallback_index: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_providers(&self) -> bool {
        self.primary.is_some() || self.secondary.is_some()
    }

    /// Fill the event's image. Returns true when a provider hit was assigned
    /// (false covers both kept-source-image and static-fallback cases).
    pub async fn fill(&self, event: &mut EventDraft, keywords: &[String]) -> bool {
        // Source-provided imagery always wins.
        if event.source_image_url.is_some() {
            return false;
        }

        if !keywords.is_empty() {
            for searcher in [&self.primary, &self.secondary].into_iter().flatten() {
                if let Some(hit) = self.search_and_pick(searcher.as_ref(), keywords).await {
                    event.image_url = Some(hit.url.clone());
                    event.image_attribution = hit.attribution();
                    return true;
                }
            }

            // Simplified-keyword retry against the primary provider.
            if keywords.len() > 2 {
                let simplified = &keywords[..2];
                if let Some(searcher) = &self.primary {
                    debug!(?simplified, "retrying with simplified keywords");
                    if let Some(hit) = self.search_and_pick(searcher.as_ref(), simplified).await {
                        event.image_url = Some(hit.url.clone());
                        event.image_attribution = hit.attribution();
                        return true;
                    }
                }
            }
        }

        let category = event.primary_category().unwrap_or("default").to_string();
        event.image_url = Some(self.next_fallback(&category));
        false
    }

    async fn search_and_pick(
        &self,
        searcher: &dyn ImageSearcher,
        keywords: &[String],
    ) -> Option<ImageHit> {
        let hits = match searcher.search(keywords, RESULTS_PER_QUERY).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(provider = searcher.name(), error = %e, "image search failed");
                return None;
            }
        };
        if hits.is_empty() {
            return None;
        }

        let mut cache = self.cache.lock().unwrap();
        let urls: Vec<String> = hits.iter().map(|h| h.url.clone()).collect();

        // Unused candidates first; only when the pool is exhausted may a URL
        // be reused within a run.
        let chosen_url = cache
            .pick_unused(&urls)
            .or_else(|| urls.choose(&mut rand::rng()).cloned())?;
        cache.mark_used(&chosen_url, keywords);

        hits.into_iter().find(|h| h.url == chosen_url)
    }

    /// Rotate through the curated set for a category.
    fn next_fallback(&self, category: &str) -> String {
        let set = fallback_set(category);
        let mut indices = self.fallback_index.lock().unwrap();
        let index = indices.entry(category.to_string()).or_insert(0);
        let url = set[*index % set.len()].to_string();
        *index += 1;
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct FixedSearcher {
        urls: Vec<&'static str>,
    }

    #[async_trait]
    impl ImageSearcher for FixedSearcher {
        async fn search(&self, _keywords: &[String], _per_page: usize) -> Result<Vec<ImageHit>> {
            Ok(self
                .urls
                .iter()
                .map(|url| ImageHit {
                    url: url.to_string(),
                    url_small: None,
                    url_thumb: None,
                    author: Some("Ana".to_string()),
                    author_url: None,
                    source_url: None,
                    provider: "fixture",
                })
                .collect())
        }

        fn name(&self) -> &'static str {
            "fixture"
        }
    }

    struct EmptySearcher;

    #[async_trait]
    impl ImageSearcher for EmptySearcher {
        async fn search(&self, _keywords: &[String], _per_page: usize) -> Result<Vec<ImageHit>> {
            Ok(Vec::new())
        }
        fn name(&self) -> &'static str {
            "empty"
        }
    }

    fn event() -> EventDraft {
        let mut e = EventDraft::new(
            "src",
            cartelera_common::SourceTier::Gold,
            "e1",
            "Concierto",
            NaiveDate::from_ymd_opt(2099, 12, 1).unwrap(),
        );
        e.category_slugs = vec!["cultural".to_string()];
        e
    }

    fn keywords() -> Vec<String> {
        vec!["concert".to_string(), "jazz".to_string(), "stage".to_string()]
    }

    #[tokio::test]
    async fn source_image_is_kept() {
        let resolver = ImageResolver::new(
            Some(Box::new(FixedSearcher { urls: vec!["https://img/a"] })),
            None,
            ImageCache::in_memory(),
        );
        let mut e = event();
        e.source_image_url = Some("https://source/img.jpg".to_string());
        assert!(!resolver.fill(&mut e, &keywords()).await);
        assert!(e.image_url.is_none());
    }

    #[tokio::test]
    async fn urls_are_unique_until_pool_exhausted() {
        let resolver = ImageResolver::new(
            Some(Box::new(FixedSearcher {
                urls: vec!["https://img/a", "https://img/b"],
            })),
            None,
            ImageCache::in_memory(),
        );

        let mut first = event();
        let mut second = event();
        let mut third = event();
        resolver.fill(&mut first, &keywords()).await;
        resolver.fill(&mut second, &keywords()).await;
        resolver.fill(&mut third, &keywords()).await;

        let a = first.image_url.unwrap();
        let b = second.image_url.unwrap();
        let c = third.image_url.unwrap();
        // Two distinct candidates: the first two assignments never collide,
        // the third may only reuse because the pool is exhausted.
        assert_ne!(a, b);
        assert!(c == "https://img/a" || c == "https://img/b");
    }

    #[tokio::test]
    async fn secondary_provider_covers_primary_miss() {
        let resolver = ImageResolver::new(
            Some(Box::new(EmptySearcher)),
            Some(Box::new(FixedSearcher { urls: vec!["https://img/z"] })),
            ImageCache::in_memory(),
        );
        let mut e = event();
        assert!(resolver.fill(&mut e, &keywords()).await);
        assert_eq!(e.image_url.as_deref(), Some("https://img/z"));
        assert_eq!(e.image_attribution.as_deref(), Some("Photo by Ana on fixture"));
    }

    #[tokio::test]
    async fn fallback_rotates_per_category() {
        let resolver = ImageResolver::new(None, None, ImageCache::in_memory());
        let mut a = event();
        let mut b = event();
        resolver.fill(&mut a, &[]).await;
        resolver.fill(&mut b, &[]).await;
        assert_ne!(a.image_url, b.image_url);
    }

    #[test]
    fn cache_persists_atomically() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = ImageCache::load(dir.path());
            cache.mark_used("https://img/a", &keywords());
        }
        let cache = ImageCache::load(dir.path());
        assert!(cache.is_used("https://img/a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keyword_key_ignores_order_and_case() {
        let a = ImageCache::keyword_key(&["Jazz".to_string(), "concert".to_string()]);
        let b = ImageCache::keyword_key(&["concert".to_string(), "jazz".to_string()]);
        assert_eq!(a, b);
    }
}
