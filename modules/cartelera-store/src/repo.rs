//! The persistence contract.
//!
//! Implemented by `PgEventRepository` (production) and
//! `MemoryEventRepository` (tests). Also implemented for `Arc<R>` so tests
//! can share the repository for assertions.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cartelera_common::{EventDraft, SourceContribution};

/// Counts returned from a batch save. The caller aggregates per-run stats.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl SaveOutcome {
    pub fn absorb(&mut self, other: SaveOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// A persisted event flattened for duplicate-candidate comparison and merge.
/// Carries the whitelisted mergeable fields plus the identity needed to
/// write the merge back.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CandidateEvent {
    pub id: Uuid,
    pub source_slug: String,
    pub external_id: String,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub source_image_url: Option<String>,
    pub price_info: Option<String>,
    pub is_free: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub organizer_name: Option<String>,
    pub venue_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
    pub external_url: Option<String>,
    pub category_slugs: Vec<String>,
}

impl CandidateEvent {
    /// Flatten a draft into candidate form (used when a fresh insert later
    /// serves as a merge target within the same run).
    pub fn from_draft(event: &EventDraft) -> Self {
        Self {
            id: event.id,
            source_slug: event.source_slug.clone(),
            external_id: event.external_id.clone(),
            title: event.title.clone(),
            start_date: event.start_date,
            end_date: event.end_date,
            start_time: event.start_time,
            end_time: event.end_time,
            description: event.description.clone(),
            summary: event.summary.clone(),
            image_url: event.image_url.clone(),
            source_image_url: event.source_image_url.clone(),
            price_info: event.price_info.clone(),
            is_free: event.is_free,
            latitude: event.latitude,
            longitude: event.longitude,
            organizer_name: event.organizer.as_ref().map(|o| o.name.clone()),
            venue_name: event.venue_name.clone(),
            address: event.address.clone(),
            city: event.city.clone(),
            province: event.province.clone(),
            postal_code: event.postal_code.clone(),
            external_url: event.external_url.clone(),
            category_slugs: event.category_slugs.clone(),
        }
    }
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Upsert a batch keyed on `(source_slug, external_id)`. With
    /// `skip_existing`, a collision is a skip; otherwise an update. Satellite
    /// rows are written in the owning event's transaction; a partial write
    /// rolls back and the event counts as failed.
    async fn save_batch(&self, events: &[EventDraft], skip_existing: bool) -> Result<SaveOutcome>;

    /// Whether `(source_slug, external_id)` is already persisted.
    async fn exists(&self, source_slug: &str, external_id: &str) -> Result<bool>;

    /// Duplicate candidates: persisted events with the given start date,
    /// excluding rows from `exclude_source`. City filtering happens in the
    /// deduplicator (it owns the normalization rules).
    async fn find_candidates(
        &self,
        start_date: NaiveDate,
        exclude_source: &str,
    ) -> Result<Vec<CandidateEvent>>;

    /// Write a merged candidate back over the persisted event.
    async fn update_merged(&self, merged: &CandidateEvent) -> Result<()>;

    /// Record (or re-record) a source's contribution to an event.
    async fn record_contribution(&self, contribution: &SourceContribution) -> Result<()>;

    /// Number of contribution rows for an event. Zero means the next
    /// contribution is the primary one.
    async fn contribution_count(&self, event_id: Uuid) -> Result<u32>;
}

#[async_trait]
impl<R: EventRepository + ?Sized> EventRepository for Arc<R> {
    async fn save_batch(&self, events: &[EventDraft], skip_existing: bool) -> Result<SaveOutcome> {
        (**self).save_batch(events, skip_existing).await
    }

    async fn exists(&self, source_slug: &str, external_id: &str) -> Result<bool> {
        (**self).exists(source_slug, external_id).await
    }

    async fn find_candidates(
        &self,
        start_date: NaiveDate,
        exclude_source: &str,
    ) -> Result<Vec<CandidateEvent>> {
        (**self).find_candidates(start_date, exclude_source).await
    }

    async fn update_merged(&self, merged: &CandidateEvent) -> Result<()> {
        (**self).update_merged(merged).await
    }

    async fn record_contribution(&self, contribution: &SourceContribution) -> Result<()> {
        (**self).record_contribution(contribution).await
    }

    async fn contribution_count(&self, event_id: Uuid) -> Result<u32> {
        (**self).contribution_count(event_id).await
    }
}
