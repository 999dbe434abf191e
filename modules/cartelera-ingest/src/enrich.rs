//! Batched model enrichment.
//!
//! Events go to the chat model in batches; the model returns a strict-JSON
//! map from event id to an enrichment record (summary, tentative categories,
//! price inference, image keywords, neutral restatement). The model slot is
//! chosen by source tier. A failed batch degrades gracefully: its ids are
//! simply absent from the result map.

use std::collections::HashMap;

use serde_json::json;
use tracing::{debug, warn};

use ai_client::util::parse_json_loose;
use cartelera_common::text::truncate_chars;
use cartelera_common::vocab::{self, ModelSlot};
use cartelera_common::{ChatModel, Config, Enrichment, EventDraft, SourceTier};

pub const DEFAULT_BATCH_SIZE: usize = 10;
const DESCRIPTION_BUDGET: usize = 1500;
const MAX_TOKENS_PER_EVENT: u32 = 350;
const TEMPERATURE: f32 = 0.1;

const SYSTEM_PROMPT: &str = "Eres un asistente que analiza eventos culturales españoles. \
    Respondes únicamente con JSON válido, sin explicaciones ni marcas de código.";

/// Public venues whose events are free unless stated otherwise.
const FREE_VENUE_KEYWORDS: &[&str] = &[
    "biblioteca",
    "museo",
    "archivo",
    "casa de cultura",
    "centro cultural",
    "centro cívico",
    "sala de exposiciones",
];

/// Words that mark an event as free; never echoed back into price_info.
const FREE_MARKERS: &[&str] = &["gratis", "gratuito", "gratuït", "libre", "lliure", "entrada libre"];

pub struct Enricher<'a> {
    model: &'a dyn ChatModel,
    config: &'a Config,
    batch_size: usize,
}

impl<'a> Enricher<'a> {
    pub fn new(model: &'a dyn ChatModel, config: &'a Config) -> Self {
        Self {
            model,
            config,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Enrich a batch of events. Returns a map keyed by external_id; events
    /// the model failed on are absent.
    pub async fn enrich_batch(
        &self,
        events: &[EventDraft],
        tier: SourceTier,
    ) -> HashMap<String, Enrichment> {
        let model = self.config.model_for_slot(ModelSlot::for_tier(tier));
        let mut results = HashMap::new();

        for chunk in events.chunks(self.batch_size) {
            self.enrich_chunk(chunk, model, &mut results).await;
        }

        debug!(total = events.len(), enriched = results.len(), "enrichment complete");
        results
    }

    /// One model call for a chunk. On a truncated response the chunk is split
    /// and both halves retried; a chunk of one that still truncates is lost.
    async fn enrich_chunk(
        &self,
        chunk: &[EventDraft],
        model: &str,
        results: &mut HashMap<String, Enrichment>,
    ) {
        if chunk.is_empty() {
            return;
        }

        let prompt = build_prompt(chunk);
        let max_tokens = MAX_TOKENS_PER_EVENT * chunk.len() as u32;

        let completion = match self
            .model
            .complete(model, SYSTEM_PROMPT, &prompt, TEMPERATURE, max_tokens)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(model, batch = chunk.len(), error = %e, "enrichment call failed");
                return;
            }
        };

        match parse_enrichments(&completion) {
            Ok(parsed) => {
                for (id, enrichment) in parsed {
                    results.insert(id, enrichment);
                }
            }
            Err(e) if chunk.len() > 1 => {
                // Likely a truncated response; halve and retry.
                warn!(batch = chunk.len(), error = %e, "enrichment response unparseable, splitting batch");
                let mid = chunk.len() / 2;
                Box::pin(self.enrich_chunk(&chunk[..mid], model, results)).await;
                Box::pin(self.enrich_chunk(&chunk[mid..], model, results)).await;
            }
            Err(e) => {
                warn!(error = %e, "enrichment response unparseable for single event");
            }
        }
    }
}

fn build_prompt(events: &[EventDraft]) -> String {
    let inputs: Vec<serde_json::Value> = events
        .iter()
        .map(|e| {
            json!({
                "id": e.external_id,
                "title": e.title,
                "description": e.description.as_deref().map(|d| truncate_chars(d, DESCRIPTION_BUDGET)),
                "venue": e.venue_name,
                "location": ([e.city.as_deref(), e.province.as_deref(), e.region.as_deref()]
                    .iter()
                    .flatten()
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", ")),
                "type_hint": e.primary_category(),
                "audience": "",
                "price_info": e.price_info,
            })
        })
        .collect();

    let slugs: Vec<&str> = vocab::CATEGORIES.iter().map(|c| c.slug).collect();

    format!(
        "Analiza estos eventos y devuelve un objeto JSON que mapea cada id a:\n\
         {{\"summary\": resumen en español (máx 150 caracteres),\n\
          \"category_slugs\": hasta 3 de [{}],\n\
          \"is_free\": true/false/null,\n\
          \"price\": número o null,\n\
          \"price_details\": texto o null,\n\
          \"image_keywords\": 3 sustantivos EN INGLÉS para buscar imágenes,\n\
          \"normalized_text\": una frase neutra que describa el evento}}\n\n\
         EVENTOS:\n{}",
        slugs.join(", "),
        serde_json::to_string(&inputs).unwrap_or_default()
    )
}

/// Tolerant parse of the model's id → enrichment map. Unknown category slugs
/// are discarded; image keywords are capped at 3.
fn parse_enrichments(response: &str) -> anyhow::Result<HashMap<String, Enrichment>> {
    let value = parse_json_loose(response)?;
    let map = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("enrichment response is not an object"))?;

    let mut out = HashMap::new();
    for (id, entry) in map {
        match serde_json::from_value::<Enrichment>(entry.clone()) {
            Ok(mut enrichment) => {
                enrichment.category_slugs.retain(|s| vocab::is_valid_slug(s));
                enrichment.category_slugs.truncate(3);
                enrichment.image_keywords.truncate(3);
                out.insert(id.clone(), enrichment);
            }
            Err(e) => {
                warn!(id = %id, error = %e, "skipping malformed enrichment entry");
            }
        }
    }
    Ok(out)
}

/// Apply an enrichment to an event. Classification happens separately (the
/// classifier consumes `normalized_text` and falls back to these categories);
/// here we take summary and pricing.
pub fn apply_enrichment(event: &mut EventDraft, enrichment: &Enrichment) {
    if let Some(summary) = &enrichment.summary {
        event.summary = Some(summary.clone());
    }

    if let Some(is_free) = enrichment.is_free {
        event.is_free = Some(is_free);
    }
    if let Some(price) = enrichment.price {
        event.price = Some(price);
        event.is_free = Some(price == 0.0);
    }

    if let Some(details) = &enrichment.price_details {
        let details = details.trim();
        if FREE_MARKERS.contains(&details.to_lowercase().as_str()) {
            event.is_free = Some(true);
            event.price_info = None;
        } else if !details.is_empty() {
            event.price_info = Some(details.to_string());
        }
    } else if enrichment.price.is_some() {
        // A concrete price supersedes free-form price text.
        event.price_info = None;
    }

    infer_pricing(event);
}

/// Fallback inference when the model left `is_free` unknown: free-marker
/// words in price_info, then public-venue keywords.
pub fn infer_pricing(event: &mut EventDraft) {
    if event.is_free.is_none() {
        if let Some(info) = &event.price_info {
            let lowered = info.to_lowercase();
            if FREE_MARKERS.iter().any(|m| lowered.contains(m)) {
                event.is_free = Some(true);
                event.price_info = None;
            }
        }
    }

    if event.is_free.is_none() {
        if let Some(venue) = &event.venue_name {
            let lowered = venue.to_lowercase();
            if FREE_VENUE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
                event.is_free = Some(true);
            }
        }
    }

    // Invariant: a free event never carries a price.
    if event.is_free == Some(true) {
        if event.price == Some(0.0) {
            event.price = None;
        }
        if let Some(info) = &event.price_info {
            let lowered = info.to_lowercase();
            if FREE_MARKERS.iter().any(|m| lowered.contains(m)) {
                event.price_info = None;
            }
        }
    }
}
