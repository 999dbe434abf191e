//! End-to-end pipeline scenarios against the in-memory repository and stub
//! model endpoints. No network, no database.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Local, NaiveDate};
use serde_json::json;

use cartelera_common::{
    ChatModel, Config, EventDraft, GoldSource, SourceConfig, SourceMeta, SourceTier, TextEmbedder,
};
use cartelera_store::{EventRepository, MemoryEventRepository};

use cartelera_ingest::fetch::{Fetcher, RawRecord};
use cartelera_ingest::pipeline::{Pipeline, PipelineConfig};
use cartelera_ingest::rate_limit::{RateLimitConfig, RateLimiter};
use cartelera_ingest::registry::SourceRegistry;
use cartelera_ingest::retry::{with_retry, RetryPolicy};

// --- Stubs ---

struct StaticFetcher {
    records: Vec<RawRecord>,
}

#[async_trait::async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(
        &self,
        _config: &SourceConfig,
        _max_pages: usize,
    ) -> std::result::Result<Vec<RawRecord>, cartelera_common::IngestError> {
        Ok(self.records.clone())
    }
}

/// Chat model answering every request with a fixed JSON map.
struct ScriptedChat {
    response: String,
}

#[async_trait::async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(
        &self,
        _model: &str,
        _system: &str,
        _user: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        Ok(self.response.clone())
    }
}

/// Keyword-axis embedder: concert-ish text lands on the `cultural` axis.
struct KeywordEmbedder;

#[async_trait::async_trait]
impl TextEmbedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lowered = text.to_lowercase();
        if lowered.contains("concierto") || lowered.contains("música") || lowered.contains("jazz") {
            Ok(vec![1.0, 0.0, 0.0])
        } else if lowered.contains("carrera") || lowered.contains("deporte") {
            Ok(vec![0.0, 1.0, 0.0])
        } else {
            Ok(vec![0.0, 0.0, 1.0])
        }
    }
}

struct UnreachableEmbedder;

#[async_trait::async_trait]
impl TextEmbedder for UnreachableEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        anyhow::bail!("connection refused")
    }
}

// --- Fixture plumbing ---

fn test_source() -> SourceConfig {
    let mut cfg = GoldSource::new(
        SourceMeta {
            slug: "madrid_datos_abiertos".to_string(),
            name: "Madrid Datos Abiertos".to_string(),
            region: "Comunidad de Madrid".to_string(),
            region_code: "13".to_string(),
            is_active: true,
        },
        "https://example.es/api",
    );
    cfg.field_mappings = BTreeMap::from([
        ("id".to_string(), "external_id".to_string()),
        ("title".to_string(), "title".to_string()),
        ("description".to_string(), "description".to_string()),
        ("start".to_string(), "start_date".to_string()),
        ("end".to_string(), "end_date".to_string()),
        ("address.locality".to_string(), "city".to_string()),
        ("venue".to_string(), "venue_name".to_string()),
        ("image".to_string(), "image_url".to_string()),
    ]);
    cfg.free_field = Some("free".to_string());
    cfg.date_format = "%Y-%m-%d".to_string();
    SourceConfig::Gold(cfg)
}

fn second_source(slug: &str) -> SourceConfig {
    let SourceConfig::Gold(mut cfg) = test_source() else {
        unreachable!()
    };
    cfg.meta.slug = slug.to_string();
    SourceConfig::Gold(cfg)
}

fn app_config() -> (Config, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::offline();
    config.cache_dir = dir.path().to_string_lossy().into_owned();
    (config, dir)
}

struct Harness {
    repo: Arc<MemoryEventRepository>,
    pipeline: Pipeline<MemoryEventRepository>,
    _cache_dir: tempfile::TempDir,
}

fn harness(
    source: SourceConfig,
    records: Vec<RawRecord>,
    chat: Option<Arc<dyn ChatModel>>,
    embedder: Option<Arc<dyn TextEmbedder>>,
    repo: Option<Arc<MemoryEventRepository>>,
) -> Harness {
    let mut registry = SourceRegistry::new();
    registry.register(source);

    let repo = repo.unwrap_or_else(|| Arc::new(MemoryEventRepository::new()));
    let (config, cache_dir) = app_config();

    let mut pipeline = Pipeline::new(
        Arc::new(registry),
        Arc::new(StaticFetcher { records }),
        Arc::clone(&repo),
        config,
    );
    if let Some(chat) = chat {
        pipeline = pipeline.with_chat_model(chat);
    }
    if let Some(embedder) = embedder {
        pipeline = pipeline.with_embedder(embedder);
    }

    Harness {
        repo,
        pipeline,
        _cache_dir: cache_dir,
    }
}

fn run_config(slug: &str) -> PipelineConfig {
    PipelineConfig::builder().source_slug(slug).build()
}

// --- S1: Gold happy path ---

#[tokio::test]
async fn gold_happy_path() {
    let raw = json!({
        "id": "m1",
        "title": "Concierto de Jazz",
        "start": "2099-12-01",
        "address": {"locality": "Madrid"},
        "free": true,
    });
    let chat = ScriptedChat {
        response: json!({
            "m1": {
                "summary": "Concierto de jazz en Madrid",
                "category_slugs": ["cultural"],
                "is_free": true,
                "image_keywords": ["jazz", "concert", "stage"],
                "normalized_text": "Concierto de jazz en un auditorio de Madrid"
            }
        })
        .to_string(),
    };

    let h = harness(
        test_source(),
        vec![raw],
        Some(Arc::new(chat)),
        Some(Arc::new(KeywordEmbedder)),
        None,
    );

    let result = h.pipeline.run(run_config("madrid_datos_abiertos")).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.raw_count, 1);
    assert_eq!(result.parsed_count, 1);
    assert_eq!(result.skipped_past, 0);
    assert_eq!(result.enriched_count, 1);
    assert_eq!(result.inserted, 1);

    let events = h.repo.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].external_id, "m1");
    assert_eq!(events[0].is_free, Some(true));
    assert_eq!(events[0].category_slugs.first().map(String::as_str), Some("cultural"));

    // One primary contribution for the fresh insert.
    let contributions = h.repo.contributions();
    assert_eq!(contributions.len(), 1);
    assert!(contributions[0].is_primary);
}

// --- S2: freshness ---

#[tokio::test]
async fn freshness_drops_yesterday_keeps_today_and_tomorrow() {
    let today = Local::now().date_naive();
    let day = |d: NaiveDate| d.format("%Y-%m-%d").to_string();

    let records = vec![
        json!({"id": "ayer", "title": "Evento de ayer", "start": day(today - Duration::days(1))}),
        json!({"id": "hoy", "title": "Evento de hoy", "start": day(today)}),
        json!({"id": "manana", "title": "Evento de mañana", "start": day(today + Duration::days(1))}),
    ];

    let h = harness(test_source(), records, None, None, None);
    let result = h.pipeline.run(run_config("madrid_datos_abiertos")).await;

    assert!(result.success);
    assert_eq!(result.parsed_count, 3);
    assert_eq!(result.skipped_past, 1);
    assert_eq!(result.inserted, 2);

    let ids: Vec<String> = h.repo.events().iter().map(|e| e.external_id.clone()).collect();
    assert!(!ids.contains(&"ayer".to_string()));
}

// --- S3: rate limit escalation (429, 429, 200) ---

#[tokio::test]
async fn rate_limit_escalation_and_decay() {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        base_delay: std::time::Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: std::time::Duration::from_millis(10),
        jitter: std::time::Duration::from_millis(0),
    }));
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_delay: std::time::Duration::from_millis(1),
        base: 2.0,
        max_delay: std::time::Duration::from_millis(5),
        jitter: std::time::Duration::from_millis(0),
    };
    let url = "https://api.example.es/events";

    let attempts = std::sync::atomic::AtomicU32::new(0);
    let payload = with_retry(&policy, "fetch", |_| {
        let limiter = Arc::clone(&limiter);
        let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move {
            limiter.acquire(url).await;
            if n < 2 {
                limiter.on_rate_limited(url).await;
                Err(cartelera_common::IngestError::RateLimited {
                    domain: "api.example.es".to_string(),
                    status: 429,
                })
            } else {
                // Level reached 2 before this success.
                assert_eq!(limiter.backoff_level(url).await, 2);
                limiter.on_success(url).await;
                Ok(json!({"items": ["ok"]}))
            }
        }
    })
    .await
    .expect("third attempt succeeds");

    assert_eq!(payload["items"][0], "ok");
    assert_eq!(limiter.backoff_level(url).await, 1);
}

// --- S4: cross-source merge ---

#[tokio::test]
async fn cross_source_merge_improves_existing_event() {
    let repo = Arc::new(MemoryEventRepository::new());

    // Existing event from another source: short description, no image.
    let mut existing = EventDraft::new(
        "galicia_agenda",
        SourceTier::Gold,
        "g1",
        "Festa do Marisco",
        NaiveDate::from_ymd_opt(2099, 5, 10).unwrap(),
    );
    existing.city = Some("Vigo".to_string());
    existing.description = Some("d".repeat(80));
    repo.save_batch(&[existing], true).await.unwrap();

    // New record from a different source: same date, richer data.
    let raw = json!({
        "id": "m9",
        "title": "Festa do Marisco de Vigo",
        "description": "x".repeat(400),
        "start": "2099-05-10",
        "address": {"locality": "Vigo"},
        "image": "https://img.example/marisco.jpg",
    });

    let h = harness(test_source(), vec![raw], None, None, Some(Arc::clone(&repo)));
    let result = h.pipeline.run(run_config("madrid_datos_abiertos")).await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.updated, 1);
    assert_eq!(result.inserted, 0);

    // No duplicate row; description replaced; image set.
    let events = repo.events();
    assert_eq!(events.len(), 1);
    let merged = &events[0];
    assert_eq!(merged.description.as_ref().unwrap().len(), 400);
    assert_eq!(
        merged.source_image_url.as_deref(),
        Some("https://img.example/marisco.jpg")
    );

    // The contributing source was recorded, not as primary.
    let contributions = repo.contributions();
    assert_eq!(contributions.len(), 1);
    assert_eq!(contributions[0].source_slug, "madrid_datos_abiertos");
}

// --- S5: free inference fallback ---

#[tokio::test]
async fn venue_based_free_inference() {
    let raw = json!({
        "id": "b1",
        "title": "Club de lectura",
        "start": "2099-09-01",
        "venue": "Biblioteca Municipal",
        "address": {"locality": "Madrid"},
    });
    // Enrichment leaves pricing unknown.
    let chat = ScriptedChat {
        response: json!({
            "b1": {
                "summary": "Club de lectura mensual",
                "category_slugs": ["cultural"],
                "normalized_text": "Club de lectura en una biblioteca"
            }
        })
        .to_string(),
    };

    let h = harness(test_source(), vec![raw], Some(Arc::new(chat)), None, None);
    let result = h.pipeline.run(run_config("madrid_datos_abiertos")).await;

    assert!(result.success);
    let events = h.repo.events();
    assert_eq!(events[0].is_free, Some(true));
    assert!(events[0].price_info.is_none());
}

// --- S6: classifier fallback when embeddings are down ---

#[tokio::test]
async fn classifier_falls_back_to_enricher_categories() {
    let raw = json!({
        "id": "s1",
        "title": "Encuentro vecinal",
        "start": "2099-09-01",
        "address": {"locality": "Madrid"},
    });
    let chat = ScriptedChat {
        response: json!({
            "s1": {
                "summary": "Encuentro de la asociación vecinal",
                "category_slugs": ["social"],
                "normalized_text": "Encuentro vecinal en Madrid"
            }
        })
        .to_string(),
    };

    let h = harness(
        test_source(),
        vec![raw],
        Some(Arc::new(chat)),
        Some(Arc::new(UnreachableEmbedder)),
        None,
    );
    let result = h.pipeline.run(run_config("madrid_datos_abiertos")).await;

    // No error surfaced; the enricher's categories stand.
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(
        h.repo.events()[0].category_slugs,
        vec!["social".to_string()]
    );
}

// --- Idempotency: second run with skip_existing changes nothing ---

#[tokio::test]
async fn second_run_is_a_noop() {
    let records = vec![
        json!({"id": "m1", "title": "Concierto de Jazz", "start": "2099-12-01",
               "address": {"locality": "Madrid"}}),
        json!({"id": "m2", "title": "Taller de cerámica", "start": "2099-12-02",
               "address": {"locality": "Madrid"}}),
    ];
    let repo = Arc::new(MemoryEventRepository::new());

    let h = harness(
        test_source(),
        records.clone(),
        None,
        None,
        Some(Arc::clone(&repo)),
    );
    let first = h.pipeline.run(run_config("madrid_datos_abiertos")).await;
    assert_eq!(first.inserted, 2);
    let contributions_after_first = repo.contributions().len();

    let h = harness(test_source(), records, None, None, Some(Arc::clone(&repo)));
    let second = h.pipeline.run(run_config("madrid_datos_abiertos")).await;

    assert!(second.success);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(repo.event_count(), 2);
    assert_eq!(repo.contributions().len(), contributions_after_first);
}

// --- Dedup skip: a matching event that adds nothing is skipped ---

#[tokio::test]
async fn matching_event_without_improvement_is_skipped() {
    let repo = Arc::new(MemoryEventRepository::new());

    let mut existing = EventDraft::new(
        "galicia_agenda",
        SourceTier::Gold,
        "g1",
        "Festa do Marisco",
        NaiveDate::from_ymd_opt(2099, 5, 10).unwrap(),
    );
    existing.city = Some("Vigo".to_string());
    existing.description = Some("d".repeat(400));
    existing.source_image_url = Some("https://img.example/a.jpg".to_string());
    repo.save_batch(&[existing], true).await.unwrap();

    let raw = json!({
        "id": "m10",
        "title": "Festa do Marisco",
        "start": "2099-05-10",
        "address": {"locality": "Vigo"},
    });

    let h = harness(second_source("otra_fuente"), vec![raw], None, None, Some(Arc::clone(&repo)));
    let result = h.pipeline.run(run_config("otra_fuente")).await;

    assert!(result.success);
    assert_eq!(result.inserted, 0);
    assert_eq!(result.updated, 0);
    assert_eq!(result.skipped, 1);
    assert_eq!(repo.event_count(), 1);
    // The skip still records the source's sighting.
    assert_eq!(repo.contributions().len(), 1);
}

// --- Configuration errors fail fast and cleanly ---

#[tokio::test]
async fn unknown_source_is_a_clean_failure() {
    let h = harness(test_source(), vec![], None, None, None);
    let result = h.pipeline.run(run_config("no_existe")).await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or("").contains("unknown source"));
}

// --- Dry run persists nothing ---

#[tokio::test]
async fn dry_run_persists_nothing() {
    let raw = json!({"id": "m1", "title": "Concierto", "start": "2099-12-01",
                     "address": {"locality": "Madrid"}});
    let h = harness(test_source(), vec![raw], None, None, None);

    let config = PipelineConfig::builder()
        .source_slug("madrid_datos_abiertos")
        .dry_run(true)
        .build();
    let result = h.pipeline.run(config).await;

    assert!(result.success);
    assert_eq!(result.inserted, 0);
    assert_eq!(h.repo.event_count(), 0);
}
