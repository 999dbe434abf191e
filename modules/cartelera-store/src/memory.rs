//! In-memory repository for tests. No database required.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use cartelera_common::{EventDraft, SourceContribution};

use crate::repo::{CandidateEvent, EventRepository, SaveOutcome};

#[derive(Default)]
struct Inner {
    /// Keyed by (source_slug, external_id).
    events: HashMap<(String, String), CandidateEvent>,
    contributions: Vec<SourceContribution>,
}

/// Thread-safe in-memory store mirroring the Postgres semantics.
#[derive(Default)]
pub struct MemoryEventRepository {
    inner: Mutex<Inner>,
}

impl MemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All persisted events (for test assertions).
    pub fn events(&self) -> Vec<CandidateEvent> {
        self.inner.lock().unwrap().events.values().cloned().collect()
    }

    /// All recorded contributions (for test assertions).
    pub fn contributions(&self) -> Vec<SourceContribution> {
        self.inner.lock().unwrap().contributions.clone()
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }
}

#[async_trait]
impl EventRepository for MemoryEventRepository {
    async fn save_batch(&self, events: &[EventDraft], skip_existing: bool) -> Result<SaveOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let mut outcome = SaveOutcome::default();

        for event in events {
            let key = (event.source_slug.clone(), event.external_id.clone());
            if inner.events.contains_key(&key) {
                if skip_existing {
                    outcome.skipped += 1;
                } else {
                    inner.events.insert(key, CandidateEvent::from_draft(event));
                    outcome.updated += 1;
                }
            } else {
                inner.events.insert(key, CandidateEvent::from_draft(event));
                outcome.inserted += 1;
            }
        }

        Ok(outcome)
    }

    async fn exists(&self, source_slug: &str, external_id: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .contains_key(&(source_slug.to_string(), external_id.to_string())))
    }

    async fn find_candidates(
        &self,
        start_date: NaiveDate,
        exclude_source: &str,
    ) -> Result<Vec<CandidateEvent>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .values()
            .filter(|e| e.start_date == start_date && e.source_slug != exclude_source)
            .cloned()
            .collect())
    }

    async fn update_merged(&self, merged: &CandidateEvent) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let key = (merged.source_slug.clone(), merged.external_id.clone());
        inner.events.insert(key, merged.clone());
        Ok(())
    }

    async fn record_contribution(&self, contribution: &SourceContribution) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        // Upsert on (event_id, source_slug).
        if let Some(existing) = inner
            .contributions
            .iter_mut()
            .find(|c| c.event_id == contribution.event_id && c.source_slug == contribution.source_slug)
        {
            *existing = contribution.clone();
        } else {
            inner.contributions.push(contribution.clone());
        }
        Ok(())
    }

    async fn contribution_count(&self, event_id: Uuid) -> Result<u32> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .contributions
            .iter()
            .filter(|c| c.event_id == event_id)
            .count() as u32)
    }
}
