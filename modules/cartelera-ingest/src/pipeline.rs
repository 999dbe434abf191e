//! The per-source orchestrator.
//!
//! Composes registry → fetch → parse → freshness → limit → enrich →
//! classify → images → geocode → dedup → persist. Every dependency sits
//! behind a narrow contract; this is the only component that composes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use cartelera_common::agents::NoOpEmbedder;
use cartelera_common::{ChatModel, Config, IngestError, SourceConfig, TextEmbedder};
use cartelera_store::EventRepository;

use crate::classify::Classifier;
use crate::dedup::{dedupe_batch, populated_fields, DedupAction, Deduplicator};
use crate::enrich::{apply_enrichment, infer_pricing, Enricher, DEFAULT_BATCH_SIZE};
use crate::fetch::Fetcher;
use crate::freshness::filter_fresh;
use crate::geocode::Geocoder;
use crate::images::ImageResolver;
use crate::parse::Parser;
use crate::registry::SourceRegistry;
use crate::report::PipelineResult;

const MAX_PAGES: usize = 3;

static NOOP_EMBEDDER: NoOpEmbedder = NoOpEmbedder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct PipelineConfig {
    #[builder(setter(into))]
    pub source_slug: String,
    #[builder(default)]
    pub limit: Option<usize>,
    #[builder(default)]
    pub dry_run: bool,
    #[builder(default)]
    pub upsert: bool,
    #[builder(default = true)]
    pub fetch_details: bool,
    #[builder(default)]
    pub skip_enrichment: bool,
    #[builder(default)]
    pub skip_images: bool,
    #[builder(default = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    #[builder(default)]
    pub debug_prefix: bool,
}

pub struct Pipeline<R> {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<dyn Fetcher>,
    repo: Arc<R>,
    app: Config,
    chat: Option<Arc<dyn ChatModel>>,
    embedder: Option<Arc<dyn TextEmbedder>>,
    images: Option<Arc<ImageResolver>>,
    geocoder: Option<Arc<Geocoder>>,
}

impl<R: EventRepository> Pipeline<R> {
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: Arc<dyn Fetcher>,
        repo: Arc<R>,
        app: Config,
    ) -> Self {
        Self {
            registry,
            fetcher,
            repo,
            app,
            chat: None,
            embedder: None,
            images: None,
            geocoder: None,
        }
    }

    pub fn with_chat_model(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_images(mut self, images: Arc<ImageResolver>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Run the full pipeline for one source. Never panics, never aborts
    /// sibling sources: every failure lands in the result's error field.
    pub async fn run(&self, config: PipelineConfig) -> PipelineResult {
        let started = Instant::now();
        let mut result = PipelineResult::new(&config.source_slug);
        result.dry_run = config.dry_run;
        result.requested_limit = config.limit;

        match self.execute(&config, &mut result).await {
            Ok(()) => result.success = true,
            Err(e) => {
                error!(source = %config.source_slug, error = %e, "pipeline failed");
                result.success = false;
                result.error = Some(e.to_string());
            }
        }

        result.duration = started.elapsed();
        result
    }

    async fn execute(
        &self,
        config: &PipelineConfig,
        result: &mut PipelineResult,
    ) -> Result<(), IngestError> {
        // --- Source lookup (configuration errors fail before any I/O) ---
        let source = self
            .registry
            .get(&config.source_slug)
            .ok_or_else(|| IngestError::Config(format!("unknown source: {}", config.source_slug)))?;
        let source = apply_flags(source.clone(), config);

        result.source_name = source.meta().name.clone();
        result.region = source.meta().region.clone();
        result.tier = Some(source.tier());

        info!(
            source = %config.source_slug,
            tier = %source.tier(),
            region = %source.meta().region,
            "pipeline start"
        );

        // --- Fetch ---
        let raw_records = self.fetcher.fetch(&source, MAX_PAGES).await?;
        result.raw_count = raw_records.len() as u32;

        // --- Parse + identity uniqueness + freshness ---
        let parser = Parser::new();
        let mut seen_ids = HashSet::new();
        let mut events = Vec::new();
        for raw in &raw_records {
            let Some(event) = parser.parse(&source, raw) else {
                continue;
            };
            if !seen_ids.insert(event.external_id.clone()) {
                result.batch_duplicates += 1;
                continue;
            }
            events.push(event);
        }
        result.parsed_count = events.len() as u32;

        let today = Local::now().date_naive();
        let (mut events, skipped_past) = filter_fresh(events, today);
        result.skipped_past = skipped_past;

        if events.is_empty() {
            warn!(source = %config.source_slug, "no current events");
            return Ok(());
        }

        // --- Limit ---
        if let Some(limit) = config.limit {
            if events.len() < limit {
                result.limit_reached = false;
                warn!(
                    source = %config.source_slug,
                    requested = limit,
                    available = events.len(),
                    "fewer events than requested"
                );
            }
            events.truncate(limit);
        }

        if config.debug_prefix {
            let prefix = format!("[{}] ", config.source_slug);
            for event in &mut events {
                if !event.title.starts_with('[') {
                    event.title = format!("{prefix}{}", event.title);
                }
            }
        }

        // --- In-batch dedup ---
        let (mut events, batch_dupes) = dedupe_batch(events);
        result.batch_duplicates += batch_dupes;
        result.limited_count = events.len() as u32;

        // --- Enrichment ---
        let mut enrichments = std::collections::HashMap::new();
        if !config.skip_enrichment {
            if let Some(chat) = &self.chat {
                let enricher =
                    Enricher::new(chat.as_ref(), &self.app).with_batch_size(config.batch_size);
                enrichments = enricher.enrich_batch(&events, source.tier()).await;
                result.enriched_count = enrichments.len() as u32;
            }
        }
        for event in &mut events {
            match enrichments.get(&event.external_id) {
                Some(enrichment) => apply_enrichment(event, enrichment),
                None => infer_pricing(event),
            }
        }

        // --- Classification ---
        let embedder_ref: &dyn TextEmbedder = match &self.embedder {
            Some(embedder) => embedder.as_ref(),
            None => &NOOP_EMBEDDER,
        };
        let mut classifier = Classifier::new(embedder_ref).with_cache_dir(&self.app.cache_dir);
        if self.embedder.is_some() {
            if let Err(e) = classifier.prepare().await {
                warn!(error = %e, "category embeddings unavailable, using enricher fallback");
            }
        }
        for event in &mut events {
            let enrichment = enrichments.get(&event.external_id);
            classifier.apply(event, enrichment).await;
        }

        // --- Images ---
        if !config.skip_images {
            if let Some(images) = &self.images {
                for event in &mut events {
                    let keywords = enrichments
                        .get(&event.external_id)
                        .map(|e| e.image_keywords.clone())
                        .unwrap_or_default();
                    if images.fill(event, &keywords).await {
                        result.images_found += 1;
                    }
                }
            }
        }

        // --- Geocoding ---
        if let Some(geocoder) = &self.geocoder {
            for event in &mut events {
                geocoder.fill(event).await;
            }
        }

        // --- Histograms ---
        for event in &events {
            let category = event.primary_category().unwrap_or("n/a").to_string();
            *result.categories.entry(category).or_insert(0) += 1;
            let region = event.region.clone().unwrap_or_else(|| "n/a".to_string());
            *result.regions.entry(region).or_insert(0) += 1;
        }

        if config.dry_run {
            info!(
                source = %config.source_slug,
                would_insert = events.len(),
                "dry run, skipping persistence"
            );
            return Ok(());
        }

        // --- Cross-source dedup + persistence ---
        let dedup = Deduplicator::new(Arc::clone(&self.repo));
        let mut to_insert = Vec::new();

        for event in &events {
            let resolution = dedup
                .resolve(event)
                .await
                .map_err(|e| IngestError::Persistence(e.to_string()))?;

            match resolution.action {
                DedupAction::Insert => to_insert.push(event.clone()),
                DedupAction::Merge => {
                    dedup
                        .commit_merge(event, &resolution)
                        .await
                        .map_err(|e| IngestError::Persistence(e.to_string()))?;
                    result.updated += 1;
                }
                DedupAction::Skip => {
                    if let Some(existing) = &resolution.existing {
                        if let Err(e) = dedup.record_contribution(existing.id, event, Vec::new()).await
                        {
                            warn!(error = %e, "failed to record contribution");
                        }
                    }
                    result.skipped += 1;
                }
            }
        }

        // A row already persisted from an earlier run keeps its original
        // contribution; only fresh inserts get one recorded below.
        let mut fresh = Vec::with_capacity(to_insert.len());
        for event in &to_insert {
            let existed = self
                .repo
                .exists(&event.source_slug, &event.external_id)
                .await
                .map_err(|e| IngestError::Persistence(e.to_string()))?;
            if !existed {
                fresh.push(event.clone());
            }
        }

        let outcome = self
            .repo
            .save_batch(&to_insert, !config.upsert)
            .await
            .map_err(|e| IngestError::Persistence(e.to_string()))?;
        result.inserted += outcome.inserted;
        result.updated += outcome.updated;
        result.skipped += outcome.skipped;
        result.failed += outcome.failed;

        for event in &fresh {
            if let Err(e) = dedup
                .record_contribution(event.id, event, populated_fields(event))
                .await
            {
                warn!(source = %event.source_slug, external_id = %event.external_id, error = %e,
                    "failed to record contribution");
            }
        }

        info!(
            source = %config.source_slug,
            inserted = result.inserted,
            updated = result.updated,
            skipped = result.skipped,
            failed = result.failed,
            "pipeline complete"
        );
        Ok(())
    }
}

/// CLI flags that override per-source settings (detail fetching).
fn apply_flags(mut source: SourceConfig, config: &PipelineConfig) -> SourceConfig {
    if !config.fetch_details {
        match &mut source {
            SourceConfig::Silver(cfg) => cfg.fetch_details = false,
            SourceConfig::Bronze(cfg) => cfg.fetch_details = false,
            SourceConfig::Gold(_) => {}
        }
    }
    source
}
