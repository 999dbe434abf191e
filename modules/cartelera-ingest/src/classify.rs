//! Hybrid semantic classification.
//!
//! Embedding-vs-category cosine first, enricher categories as fallback.
//! Reference embeddings for the controlled vocabulary are computed once per
//! vocabulary version and cached to a local JSON artifact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cartelera_common::text::truncate_chars;
use cartelera_common::vocab::{CATEGORIES, FALLBACK_CATEGORY, VOCAB_VERSION};
use cartelera_common::{Enrichment, EventDraft, TextEmbedder};

pub const CONFIDENCE_THRESHOLD: f64 = 0.5;
pub const TOP_K: usize = 3;
const EMBED_INPUT_BUDGET: usize = 8000;

#[derive(Serialize, Deserialize, Default)]
struct EmbeddingCache {
    version: String,
    embeddings: BTreeMap<String, Vec<f32>>,
}

pub struct Classifier<'a> {
    embedder: &'a dyn TextEmbedder,
    cache_path: Option<PathBuf>,
    category_embeddings: BTreeMap<String, Vec<f32>>,
    threshold: f64,
    top_k: usize,
}

impl<'a> Classifier<'a> {
    pub fn new(embedder: &'a dyn TextEmbedder) -> Self {
        Self {
            embedder,
            cache_path: None,
            category_embeddings: BTreeMap::new(),
            threshold: CONFIDENCE_THRESHOLD,
            top_k: TOP_K,
        }
    }

    /// Persist category embeddings under `cache_dir`, keyed by vocabulary
    /// version. A version mismatch invalidates the artifact.
    pub fn with_cache_dir(mut self, cache_dir: impl AsRef<Path>) -> Self {
        self.cache_path = Some(cache_dir.as_ref().join("category_embeddings.json"));
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Load or compute the reference embeddings. Call once before
    /// classifying; a failure here degrades to the enricher-fallback path.
    pub async fn prepare(&mut self) -> Result<()> {
        if let Some(cached) = self.load_cache() {
            self.category_embeddings = cached;
            debug!(categories = self.category_embeddings.len(), "category embeddings from cache");
            return Ok(());
        }

        let mut embeddings = BTreeMap::new();
        for category in CATEGORIES {
            let vector = self
                .embedder
                .embed(category.description)
                .await
                .with_context(|| format!("embedding category '{}'", category.slug))?;
            embeddings.insert(category.slug.to_string(), vector);
        }
        info!(categories = embeddings.len(), version = VOCAB_VERSION, "category embeddings computed");

        self.category_embeddings = embeddings;
        self.save_cache();
        Ok(())
    }

    fn load_cache(&self) -> Option<BTreeMap<String, Vec<f32>>> {
        let path = self.cache_path.as_ref()?;
        let data = std::fs::read_to_string(path).ok()?;
        let cache: EmbeddingCache = serde_json::from_str(&data).ok()?;
        if cache.version != VOCAB_VERSION {
            debug!(cached = %cache.version, current = VOCAB_VERSION, "vocabulary changed, cache invalid");
            return None;
        }
        if CATEGORIES.iter().any(|c| !cache.embeddings.contains_key(c.slug)) {
            return None;
        }
        Some(cache.embeddings)
    }

    /// Write-temp-then-rename so a crash never leaves a torn artifact.
    fn save_cache(&self) {
        let Some(path) = &self.cache_path else { return };
        let cache = EmbeddingCache {
            version: VOCAB_VERSION.to_string(),
            embeddings: self.category_embeddings.clone(),
        };
        let result = (|| -> Result<()> {
            let dir = path.parent().context("cache path has no parent")?;
            std::fs::create_dir_all(dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            serde_json::to_writer(&mut tmp, &cache)?;
            tmp.persist(path)?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!(error = %e, "failed to persist category embedding cache");
        }
    }

    /// Scored categories above the threshold, best first, capped at top-K.
    /// Deterministic: ties break on slug order.
    pub async fn classify(&self, text: &str) -> Result<Vec<(String, f64)>> {
        let input = truncate_chars(text, EMBED_INPUT_BUDGET);
        let embedding = self.embedder.embed(input).await?;

        let mut scored: Vec<(String, f64)> = self
            .category_embeddings
            .iter()
            .map(|(slug, reference)| (slug.clone(), cosine_similarity(&embedding, reference)))
            .filter(|(_, score)| *score >= self.threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(self.top_k);
        Ok(scored)
    }

    /// Assign `category_slugs` on the event: embedding scores first, the
    /// enricher's tentative categories as fallback, `otros` as last resort.
    pub async fn apply(&self, event: &mut EventDraft, enrichment: Option<&Enrichment>) {
        let text = enrichment
            .and_then(|e| e.normalized_text.clone())
            .unwrap_or_else(|| {
                let description = event.description.as_deref().unwrap_or("");
                format!("{} | {}", event.title, truncate_chars(description, 500))
            });

        if !self.category_embeddings.is_empty() {
            match self.classify(&text).await {
                Ok(scored) if !scored.is_empty() => {
                    event.category_slugs = scored.into_iter().map(|(slug, _)| slug).collect();
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(title = %event.title, error = %e, "embedding classification failed, using fallback");
                }
            }
        }

        let fallback: Vec<String> = enrichment
            .map(|e| e.category_slugs.clone())
            .unwrap_or_default();
        event.category_slugs = if fallback.is_empty() {
            vec![FALLBACK_CATEGORY.to_string()]
        } else {
            fallback
        };
    }
}

/// Plain cosine over f32 slices. The vocabulary is O(10), vectors are 1024
/// wide; this is never the bottleneck.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += *x as f64 * *y as f64;
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
