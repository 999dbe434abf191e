//! Cross-source deduplication and quality-weighted merging.
//!
//! Runs after all annotations, before persistence. Candidates are persisted
//! events sharing the start date (other sources only); the match test is
//! date + title similarity + city-or-venue agreement. A match either merges
//! (when the new source measurably improves the row) or skips, and every
//! outcome appends a source-contribution record.

use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;
use tokio::sync::Mutex;
use tracing::debug;

use cartelera_common::quality::{field_weight, quality_score, MIN_IMPROVEMENT, W_COORDINATES};
use cartelera_common::text::{normalize_city, title_contains, title_similarity};
use cartelera_common::{EventDraft, SourceContribution};
use cartelera_store::{CandidateEvent, EventRepository};

pub const TITLE_THRESHOLD: f64 = 0.85;
pub const VENUE_THRESHOLD: f64 = 0.70;
/// With neither city nor venue to compare, only near-identical titles match.
pub const TITLE_ONLY_THRESHOLD: f64 = 0.95;

/// Description replacement requires a meaningfully longer text.
const DESCRIPTION_REPLACE_MARGIN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupAction {
    Insert,
    Merge,
    Skip,
}

#[derive(Debug)]
pub struct Resolution {
    pub action: DedupAction,
    /// The merged row to write back (Merge) or the matched row (Skip).
    pub existing: Option<CandidateEvent>,
    pub fields_merged: Vec<String>,
    pub quality_before: i32,
    pub quality_after: i32,
}

// --- Pure decision functions ---

/// The three-part match test.
pub fn is_cross_source_duplicate(event: &EventDraft, candidate: &CandidateEvent) -> bool {
    if event.start_date != candidate.start_date {
        return false;
    }

    let similarity = title_similarity(&event.title, &candidate.title);
    if similarity < TITLE_THRESHOLD && !title_contains(&event.title, &candidate.title) {
        return false;
    }

    let event_city = event.city.as_deref().map(normalize_city).unwrap_or_default();
    let candidate_city = candidate.city.as_deref().map(normalize_city).unwrap_or_default();
    if !event_city.is_empty() && !candidate_city.is_empty() {
        if event_city == candidate_city {
            return true;
        }
        // Different cities: same title on the same day in two places is a
        // touring production, not a duplicate.
        return false;
    }

    if let (Some(venue_a), Some(venue_b)) = (&event.venue_name, &candidate.venue_name) {
        if title_similarity(venue_a, venue_b) >= VENUE_THRESHOLD {
            return true;
        }
    }

    similarity >= TITLE_ONLY_THRESHOLD
}

/// Fill-empty merge over the whitelisted fields. Description is replaced only
/// by a significantly longer one; categories are unioned.
pub fn merge_into(existing: &CandidateEvent, event: &EventDraft) -> (CandidateEvent, Vec<String>) {
    let mut merged = existing.clone();
    let mut fields = Vec::new();

    fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>, name: &str, fields: &mut Vec<String>) {
        if slot.is_none() && value.is_some() {
            *slot = value.clone();
            fields.push(name.to_string());
        }
    }

    // Description: longer-wins with a margin, besides fill-empty.
    match (&merged.description, &event.description) {
        (None, Some(new)) if !new.is_empty() => {
            merged.description = Some(new.clone());
            fields.push("description".to_string());
        }
        (Some(old), Some(new)) if new.len() > old.len() + DESCRIPTION_REPLACE_MARGIN => {
            merged.description = Some(new.clone());
            fields.push("description".to_string());
        }
        _ => {}
    }

    fill(&mut merged.summary, &event.summary, "summary", &mut fields);
    fill(&mut merged.image_url, &event.image_url, "image_url", &mut fields);
    fill(
        &mut merged.source_image_url,
        &event.source_image_url,
        "source_image_url",
        &mut fields,
    );
    fill(&mut merged.end_date, &event.end_date, "end_date", &mut fields);
    fill(&mut merged.start_time, &event.start_time, "start_time", &mut fields);
    fill(&mut merged.end_time, &event.end_time, "end_time", &mut fields);
    fill(&mut merged.price_info, &event.price_info, "price_info", &mut fields);
    fill(&mut merged.is_free, &event.is_free, "is_free", &mut fields);
    fill(&mut merged.latitude, &event.latitude, "latitude", &mut fields);
    fill(&mut merged.longitude, &event.longitude, "longitude", &mut fields);
    fill(&mut merged.venue_name, &event.venue_name, "venue_name", &mut fields);
    fill(&mut merged.address, &event.address, "address", &mut fields);
    fill(&mut merged.postal_code, &event.postal_code, "postal_code", &mut fields);
    fill(&mut merged.external_url, &event.external_url, "external_url", &mut fields);

    let organizer_name = event.organizer.as_ref().map(|o| o.name.clone());
    fill(&mut merged.organizer_name, &organizer_name, "organizer", &mut fields);

    // Categories: union capped at 4, existing order first.
    let mut added = false;
    for slug in &event.category_slugs {
        if merged.category_slugs.len() >= 4 {
            break;
        }
        if !merged.category_slugs.contains(slug) {
            merged.category_slugs.push(slug.clone());
            added = true;
        }
    }
    if added {
        fields.push("category_slugs".to_string());
    }

    (merged, fields)
}

/// Sum of weights of the fields a merge would newly populate.
pub fn estimated_improvement(fields: &[String]) -> i32 {
    let mut improvement = 0;
    let mut coordinates_counted = false;
    for field in fields {
        match field.as_str() {
            // Both axes land together; weigh the pair once.
            "latitude" | "longitude" => {
                if !coordinates_counted {
                    improvement += W_COORDINATES;
                    coordinates_counted = true;
                }
            }
            other => improvement += field_weight(other),
        }
    }
    improvement
}

/// Quality score of a persisted candidate row (same weights table as drafts).
pub fn candidate_quality(candidate: &CandidateEvent) -> i32 {
    use cartelera_common::quality::*;

    let mut score = 0;
    if candidate
        .description
        .as_deref()
        .is_some_and(|d| d.len() > DESCRIPTION_MIN_CHARS)
    {
        score += W_DESCRIPTION;
    }
    if candidate.image_url.is_some() || candidate.source_image_url.is_some() {
        score += W_IMAGE;
    }
    if candidate.latitude.is_some() && candidate.longitude.is_some() {
        score += W_COORDINATES;
    }
    if candidate.price_info.is_some() {
        score += W_PRICE_INFO;
    }
    if candidate.end_date.is_some() {
        score += W_END_DATE;
    }
    if candidate.organizer_name.is_some() {
        score += W_ORGANIZER;
    }
    if candidate.start_time.is_some() {
        score += W_START_TIME;
    }
    if candidate.end_time.is_some() {
        score += W_END_TIME;
    }
    if !candidate.category_slugs.is_empty() {
        score += W_CATEGORY;
    }
    if candidate.external_url.is_some() {
        score += W_EXTERNAL_URL;
    }
    score
}

/// Populated mergeable fields of a draft, for contribution records.
pub fn populated_fields(event: &EventDraft) -> Vec<String> {
    let mut fields = Vec::new();
    if event.description.is_some() {
        fields.push("description".to_string());
    }
    if event.summary.is_some() {
        fields.push("summary".to_string());
    }
    if event.has_image() {
        fields.push("image_url".to_string());
    }
    if event.end_date.is_some() {
        fields.push("end_date".to_string());
    }
    if event.start_time.is_some() {
        fields.push("start_time".to_string());
    }
    if event.end_time.is_some() {
        fields.push("end_time".to_string());
    }
    if event.price_info.is_some() {
        fields.push("price_info".to_string());
    }
    if event.is_free.is_some() {
        fields.push("is_free".to_string());
    }
    if event.has_coordinates() {
        fields.push("latitude".to_string());
        fields.push("longitude".to_string());
    }
    if event.organizer.is_some() {
        fields.push("organizer".to_string());
    }
    if event.venue_name.is_some() {
        fields.push("venue_name".to_string());
    }
    if event.address.is_some() {
        fields.push("address".to_string());
    }
    if event.external_url.is_some() {
        fields.push("external_url".to_string());
    }
    if !event.category_slugs.is_empty() {
        fields.push("category_slugs".to_string());
    }
    fields
}

// --- In-batch deduplication (single source, before cross-source) ---

/// Self-deduplicate one source's batch: keep the first occurrence, union the
/// duplicate's categories into it. Returns (unique, duplicate count).
pub fn dedupe_batch(events: Vec<EventDraft>) -> (Vec<EventDraft>, u32) {
    let mut unique: Vec<EventDraft> = Vec::with_capacity(events.len());
    let mut duplicates = 0u32;

    'outer: for event in events {
        for kept in unique.iter_mut() {
            if kept.start_date != event.start_date {
                continue;
            }
            if title_similarity(&kept.title, &event.title) < TITLE_THRESHOLD {
                continue;
            }
            if let (Some(a), Some(b)) = (&kept.venue_name, &event.venue_name) {
                if title_similarity(a, b) < VENUE_THRESHOLD {
                    continue;
                }
            }
            for slug in &event.category_slugs {
                if kept.category_slugs.len() >= 4 {
                    break;
                }
                if !kept.category_slugs.contains(slug) {
                    kept.category_slugs.push(slug.clone());
                }
            }
            duplicates += 1;
            continue 'outer;
        }
        unique.push(event);
    }

    (unique, duplicates)
}

// --- The deduplicator ---

pub struct Deduplicator<R> {
    repo: R,
    /// Candidate lookups cached per (start_date, excluded source) for the run.
    cache: Mutex<HashMap<(NaiveDate, String), Vec<CandidateEvent>>>,
}

impl<R: EventRepository> Deduplicator<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Decide what to do with one annotated event. Processes in pipeline
    /// order for deterministic primary-contribution assignment.
    pub async fn resolve(&self, event: &EventDraft) -> Result<Resolution> {
        let candidates = self.candidates(event.start_date, &event.source_slug).await?;

        let matched = candidates
            .iter()
            .find(|c| is_cross_source_duplicate(event, c));

        let Some(existing) = matched else {
            return Ok(Resolution {
                action: DedupAction::Insert,
                existing: None,
                fields_merged: Vec::new(),
                quality_before: 0,
                quality_after: quality_score(event),
            });
        };

        debug!(
            new_title = %event.title,
            existing_title = %existing.title,
            existing_source = %existing.source_slug,
            "cross-source duplicate found"
        );

        let quality_before = candidate_quality(existing);
        let (merged, fields) = merge_into(existing, event);

        if !fields.is_empty() && estimated_improvement(&fields) >= MIN_IMPROVEMENT {
            let quality_after = candidate_quality(&merged);
            Ok(Resolution {
                action: DedupAction::Merge,
                existing: Some(merged),
                fields_merged: fields,
                quality_before,
                quality_after,
            })
        } else {
            Ok(Resolution {
                action: DedupAction::Skip,
                existing: Some(existing.clone()),
                fields_merged: Vec::new(),
                quality_before,
                quality_after: quality_before,
            })
        }
    }

    /// Persist a merge and record the contributing source.
    pub async fn commit_merge(&self, event: &EventDraft, resolution: &Resolution) -> Result<()> {
        let Some(merged) = &resolution.existing else {
            return Ok(());
        };
        self.repo.update_merged(merged).await?;
        self.record_contribution(merged.id, event, resolution.fields_merged.clone())
            .await
    }

    /// Contribution record for any outcome; `is_primary` only for the first
    /// contribution to the event.
    pub async fn record_contribution(
        &self,
        event_id: uuid::Uuid,
        event: &EventDraft,
        fields: Vec<String>,
    ) -> Result<()> {
        let is_primary = self.repo.contribution_count(event_id).await? == 0;
        self.repo
            .record_contribution(&SourceContribution {
                event_id,
                source_slug: event.source_slug.clone(),
                external_id: Some(event.external_id.clone()),
                external_url: event.external_url.clone(),
                fields_contributed: fields,
                quality_score: quality_score(event),
                is_primary,
            })
            .await
    }

    async fn candidates(
        &self,
        start_date: NaiveDate,
        exclude_source: &str,
    ) -> Result<Vec<CandidateEvent>> {
        let key = (start_date, exclude_source.to_string());
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(&key) {
                return Ok(cached.clone());
            }
        }
        let candidates = self.repo.find_candidates(start_date, exclude_source).await?;
        self.cache.lock().await.insert(key, candidates.clone());
        Ok(candidates)
    }
}
