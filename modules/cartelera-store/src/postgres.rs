//! Postgres repository.
//!
//! One event row plus satellite tables (`event_locations`,
//! `event_organizers`, `event_contacts`, `event_registrations`,
//! `event_accessibility`, `event_online_details`, `event_categories`,
//! `event_source_contributions`). Satellites are written inside the owning
//! event's transaction; a failure rolls the whole event back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;
use uuid::Uuid;

use cartelera_common::{EventDraft, SourceContribution};

use crate::repo::{CandidateEvent, EventRepository, SaveOutcome};

const CANDIDATE_LIMIT: i64 = 50;

enum SaveResult {
    Inserted,
    Updated,
    Skipped,
}

#[derive(Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self { pool })
    }

    async fn existing_id(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        source_slug: &str,
        external_id: &str,
    ) -> Result<Option<Uuid>> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM events WHERE source_slug = $1 AND external_id = $2",
        )
        .bind(source_slug)
        .bind(external_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.map(|r| r.0))
    }

    async fn write_event(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &EventDraft,
        existing: Option<Uuid>,
    ) -> Result<()> {
        let id = existing.unwrap_or(event.id);

        sqlx::query(
            r#"
            INSERT INTO events (
                id, source_slug, source_tier, external_id, synthetic_id, scraped_at,
                title, description, summary, image_url, source_image_url,
                image_attribution, external_url,
                start_date, end_date, start_time, end_time, all_day,
                is_free, price, price_info
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (source_slug, external_id) DO UPDATE SET
                scraped_at = EXCLUDED.scraped_at,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                summary = EXCLUDED.summary,
                image_url = EXCLUDED.image_url,
                source_image_url = EXCLUDED.source_image_url,
                image_attribution = EXCLUDED.image_attribution,
                external_url = EXCLUDED.external_url,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                all_day = EXCLUDED.all_day,
                is_free = EXCLUDED.is_free,
                price = EXCLUDED.price,
                price_info = EXCLUDED.price_info
            "#,
        )
        .bind(id)
        .bind(&event.source_slug)
        .bind(event.source_tier.to_string())
        .bind(&event.external_id)
        .bind(event.synthetic_id)
        .bind(event.scraped_at)
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.summary)
        .bind(&event.image_url)
        .bind(&event.source_image_url)
        .bind(&event.image_attribution)
        .bind(&event.external_url)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.all_day)
        .bind(event.is_free)
        .bind(event.price)
        .bind(&event.price_info)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO event_locations (
                event_id, location_type, name, address, city, province, region,
                postal_code, country, latitude, longitude
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (event_id) DO UPDATE SET
                location_type = EXCLUDED.location_type,
                name = EXCLUDED.name,
                address = EXCLUDED.address,
                city = EXCLUDED.city,
                province = EXCLUDED.province,
                region = EXCLUDED.region,
                postal_code = EXCLUDED.postal_code,
                country = EXCLUDED.country,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude
            "#,
        )
        .bind(id)
        .bind(event.location_type.to_string())
        .bind(&event.venue_name)
        .bind(&event.address)
        .bind(&event.city)
        .bind(&event.province)
        .bind(&event.region)
        .bind(&event.postal_code)
        .bind(&event.country)
        .bind(event.latitude)
        .bind(event.longitude)
        .execute(&mut **tx)
        .await?;

        if let Some(ref organizer) = event.organizer {
            sqlx::query(
                r#"
                INSERT INTO event_organizers (event_id, name, organizer_type, url)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (event_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    organizer_type = EXCLUDED.organizer_type,
                    url = EXCLUDED.url
                "#,
            )
            .bind(id)
            .bind(&organizer.name)
            .bind(&organizer.organizer_type)
            .bind(&organizer.url)
            .execute(&mut **tx)
            .await?;
        }

        if let Some(ref contact) = event.contact {
            sqlx::query(
                r#"
                INSERT INTO event_contacts (event_id, email, phone, website)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (event_id) DO UPDATE SET
                    email = EXCLUDED.email,
                    phone = EXCLUDED.phone,
                    website = EXCLUDED.website
                "#,
            )
            .bind(id)
            .bind(&contact.email)
            .bind(&contact.phone)
            .bind(&contact.website)
            .execute(&mut **tx)
            .await?;
        }

        if let Some(ref registration) = event.registration {
            sqlx::query(
                r#"
                INSERT INTO event_registrations (event_id, required, url, info)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (event_id) DO UPDATE SET
                    required = EXCLUDED.required,
                    url = EXCLUDED.url,
                    info = EXCLUDED.info
                "#,
            )
            .bind(id)
            .bind(registration.required)
            .bind(&registration.url)
            .bind(&registration.info)
            .execute(&mut **tx)
            .await?;
        }

        if let Some(ref accessibility) = event.accessibility {
            sqlx::query(
                r#"
                INSERT INTO event_accessibility (event_id, wheelchair, notes)
                VALUES ($1, $2, $3)
                ON CONFLICT (event_id) DO UPDATE SET
                    wheelchair = EXCLUDED.wheelchair,
                    notes = EXCLUDED.notes
                "#,
            )
            .bind(id)
            .bind(accessibility.wheelchair)
            .bind(&accessibility.notes)
            .execute(&mut **tx)
            .await?;
        }

        if let Some(ref online) = event.online_details {
            sqlx::query(
                r#"
                INSERT INTO event_online_details (event_id, platform, access_url)
                VALUES ($1, $2, $3)
                ON CONFLICT (event_id) DO UPDATE SET
                    platform = EXCLUDED.platform,
                    access_url = EXCLUDED.access_url
                "#,
            )
            .bind(id)
            .bind(&online.platform)
            .bind(&online.access_url)
            .execute(&mut **tx)
            .await?;
        }

        self.write_categories(tx, id, &event.category_slugs).await
    }

    async fn save_one(&self, event: &EventDraft, skip_existing: bool) -> Result<SaveResult> {
        let mut tx = self.pool.begin().await?;
        let existing = self
            .existing_id(&mut tx, &event.source_slug, &event.external_id)
            .await?;

        if existing.is_some() && skip_existing {
            tx.rollback().await?;
            return Ok(SaveResult::Skipped);
        }

        let was_existing = existing.is_some();
        self.write_event(&mut tx, event, existing).await?;
        tx.commit().await?;

        Ok(if was_existing {
            SaveResult::Updated
        } else {
            SaveResult::Inserted
        })
    }

    async fn write_categories(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
        slugs: &[String],
    ) -> Result<()> {
        sqlx::query("DELETE FROM event_categories WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut **tx)
            .await?;

        for (position, slug) in slugs.iter().enumerate() {
            sqlx::query(
                "INSERT INTO event_categories (event_id, category_slug, position) VALUES ($1, $2, $3)",
            )
            .bind(event_id)
            .bind(slug)
            .bind(position as i32)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: Uuid,
    source_slug: String,
    external_id: String,
    title: String,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    start_time: Option<chrono::NaiveTime>,
    end_time: Option<chrono::NaiveTime>,
    description: Option<String>,
    summary: Option<String>,
    image_url: Option<String>,
    source_image_url: Option<String>,
    price_info: Option<String>,
    is_free: Option<bool>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    organizer_name: Option<String>,
    venue_name: Option<String>,
    address: Option<String>,
    city: Option<String>,
    province: Option<String>,
    postal_code: Option<String>,
    external_url: Option<String>,
    category_slugs: Vec<String>,
}

impl From<CandidateRow> for CandidateEvent {
    fn from(row: CandidateRow) -> Self {
        CandidateEvent {
            id: row.id,
            source_slug: row.source_slug,
            external_id: row.external_id,
            title: row.title,
            start_date: row.start_date,
            end_date: row.end_date,
            start_time: row.start_time,
            end_time: row.end_time,
            description: row.description,
            summary: row.summary,
            image_url: row.image_url,
            source_image_url: row.source_image_url,
            price_info: row.price_info,
            is_free: row.is_free,
            latitude: row.latitude,
            longitude: row.longitude,
            organizer_name: row.organizer_name,
            venue_name: row.venue_name,
            address: row.address,
            city: row.city,
            province: row.province,
            postal_code: row.postal_code,
            external_url: row.external_url,
            category_slugs: row.category_slugs,
        }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn save_batch(&self, events: &[EventDraft], skip_existing: bool) -> Result<SaveOutcome> {
        let mut outcome = SaveOutcome::default();

        for event in events {
            match self.save_one(event, skip_existing).await {
                Ok(SaveResult::Inserted) => outcome.inserted += 1,
                Ok(SaveResult::Updated) => outcome.updated += 1,
                Ok(SaveResult::Skipped) => outcome.skipped += 1,
                Err(e) => {
                    warn!(
                        source = %event.source_slug,
                        external_id = %event.external_id,
                        error = %e,
                        "event persistence failed"
                    );
                    outcome.failed += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn exists(&self, source_slug: &str, external_id: &str) -> Result<bool> {
        let row = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS(SELECT 1 FROM events WHERE source_slug = $1 AND external_id = $2)",
        )
        .bind(source_slug)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn find_candidates(
        &self,
        start_date: NaiveDate,
        exclude_source: &str,
    ) -> Result<Vec<CandidateEvent>> {
        let rows = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT
                e.id, e.source_slug, e.external_id, e.title,
                e.start_date, e.end_date, e.start_time, e.end_time,
                e.description, e.summary, e.image_url, e.source_image_url,
                e.price_info, e.is_free, e.external_url,
                l.latitude, l.longitude, l.name AS venue_name, l.address,
                l.city, l.province, l.postal_code,
                o.name AS organizer_name,
                ARRAY(
                    SELECT category_slug FROM event_categories c
                    WHERE c.event_id = e.id ORDER BY c.position
                ) AS category_slugs
            FROM events e
            LEFT JOIN event_locations l ON l.event_id = e.id
            LEFT JOIN event_organizers o ON o.event_id = e.id
            WHERE e.start_date = $1 AND e.source_slug <> $2
            LIMIT $3
            "#,
        )
        .bind(start_date)
        .bind(exclude_source)
        .bind(CANDIDATE_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(CandidateEvent::from).collect())
    }

    async fn update_merged(&self, merged: &CandidateEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE events SET
                description = $2, summary = $3, image_url = $4,
                source_image_url = $5, end_date = $6, start_time = $7,
                end_time = $8, price_info = $9, is_free = $10, external_url = $11
            WHERE id = $1
            "#,
        )
        .bind(merged.id)
        .bind(&merged.description)
        .bind(&merged.summary)
        .bind(&merged.image_url)
        .bind(&merged.source_image_url)
        .bind(merged.end_date)
        .bind(merged.start_time)
        .bind(merged.end_time)
        .bind(&merged.price_info)
        .bind(merged.is_free)
        .bind(&merged.external_url)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE event_locations SET
                name = $2, address = $3, latitude = $4, longitude = $5,
                postal_code = $6
            WHERE event_id = $1
            "#,
        )
        .bind(merged.id)
        .bind(&merged.venue_name)
        .bind(&merged.address)
        .bind(merged.latitude)
        .bind(merged.longitude)
        .bind(&merged.postal_code)
        .execute(&mut *tx)
        .await?;

        self.write_categories(&mut tx, merged.id, &merged.category_slugs)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_contribution(&self, contribution: &SourceContribution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_source_contributions (
                event_id, source_slug, external_id, external_url,
                fields_contributed, quality_score, is_primary
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id, source_slug) DO UPDATE SET
                external_id = EXCLUDED.external_id,
                external_url = EXCLUDED.external_url,
                fields_contributed = EXCLUDED.fields_contributed,
                quality_score = EXCLUDED.quality_score
            "#,
        )
        .bind(contribution.event_id)
        .bind(&contribution.source_slug)
        .bind(&contribution.external_id)
        .bind(&contribution.external_url)
        .bind(&contribution.fields_contributed)
        .bind(contribution.quality_score)
        .bind(contribution.is_primary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn contribution_count(&self, event_id: Uuid) -> Result<u32> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM event_source_contributions WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as u32)
    }
}
