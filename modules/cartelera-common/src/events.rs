use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sources::SourceTier;

// --- Location ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    #[default]
    Physical,
    Online,
    Hybrid,
}

impl std::fmt::Display for LocationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationType::Physical => write!(f, "physical"),
            LocationType::Online => write!(f, "online"),
            LocationType::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for LocationType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "physical" => Ok(Self::Physical),
            "online" => Ok(Self::Online),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown LocationType: {other}")),
        }
    }
}

// --- Satellites ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Organizer {
    pub name: String,
    pub organizer_type: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Registration {
    pub required: bool,
    pub url: Option<String>,
    pub info: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Accessibility {
    pub wheelchair: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OnlineDetails {
    pub platform: Option<String>,
    pub access_url: Option<String>,
}

/// A record that a given source supplied specific fields of a persisted event.
/// Append-only per (event, source); re-recording replaces the field list and score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContribution {
    pub event_id: Uuid,
    pub source_slug: String,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub fields_contributed: Vec<String>,
    pub quality_score: i32,
    pub is_primary: bool,
}

// --- The normalized event ---

/// The canonical entity the pipeline produces.
///
/// Identity is `(source_slug, external_id)`; the UUID becomes the primary key
/// at first persistence. Everything downstream of the parser annotates this
/// struct in place: the enricher, classifier, image resolver, and geocoder
/// each fill fields they own and never touch the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDraft {
    pub id: Uuid,

    // Provenance
    pub source_slug: String,
    pub source_tier: SourceTier,
    pub external_id: String,
    /// True when the parser had to synthesize the external_id from
    /// title + date + venue because the source doesn't carry one.
    pub synthetic_id: bool,
    pub scraped_at: DateTime<Utc>,

    // Content
    pub title: String,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub source_image_url: Option<String>,
    pub image_attribution: Option<String>,
    pub external_url: Option<String>,

    // Temporal
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub all_day: bool,

    // Classification (primary slug first)
    pub category_slugs: Vec<String>,

    // Pricing. `is_free` is tri-state: None = unknown.
    pub is_free: Option<bool>,
    pub price: Option<f64>,
    pub price_info: Option<String>,

    // Location
    pub venue_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_type: LocationType,

    // Relations
    pub organizer: Option<Organizer>,
    pub contact: Option<ContactInfo>,
    pub registration: Option<Registration>,
    pub accessibility: Option<Accessibility>,
    pub online_details: Option<OnlineDetails>,
}

impl EventDraft {
    /// Create a draft with required identity and temporal fields; everything
    /// else starts empty.
    pub fn new(
        source_slug: impl Into<String>,
        source_tier: SourceTier,
        external_id: impl Into<String>,
        title: impl Into<String>,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_slug: source_slug.into(),
            source_tier,
            external_id: external_id.into(),
            synthetic_id: false,
            scraped_at: Utc::now(),
            title: title.into(),
            description: None,
            summary: None,
            image_url: None,
            source_image_url: None,
            image_attribution: None,
            external_url: None,
            start_date,
            end_date: None,
            start_time: None,
            end_time: None,
            all_day: false,
            category_slugs: Vec::new(),
            is_free: None,
            price: None,
            price_info: None,
            venue_name: None,
            address: None,
            city: None,
            province: None,
            region: None,
            postal_code: None,
            country: "España".to_string(),
            latitude: None,
            longitude: None,
            location_type: LocationType::Physical,
            organizer: None,
            contact: None,
            registration: None,
            accessibility: None,
            online_details: None,
        }
    }

    /// The latest meaningful date: end_date when present, else start_date.
    pub fn latest_date(&self) -> NaiveDate {
        self.end_date.unwrap_or(self.start_date)
    }

    /// The primary category slug, when classified.
    pub fn primary_category(&self) -> Option<&str> {
        self.category_slugs.first().map(String::as_str)
    }

    pub fn has_image(&self) -> bool {
        self.image_url.is_some() || self.source_image_url.is_some()
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

// --- Enrichment ---

/// Model-generated per-event metadata. The enricher never assigns an image
/// URL and never writes to the database; it only produces this record.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct Enrichment {
    pub summary: Option<String>,
    #[serde(default)]
    pub category_slugs: Vec<String>,
    pub is_free: Option<bool>,
    pub price: Option<f64>,
    pub price_details: Option<String>,
    /// English noun phrases for image search, capped at 3.
    #[serde(default)]
    pub image_keywords: Vec<String>,
    /// Concise neutral restatement used as embedding input by the classifier.
    pub normalized_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> EventDraft {
        EventDraft::new(
            "madrid_datos_abiertos",
            SourceTier::Gold,
            "m1",
            "Concierto de Jazz",
            NaiveDate::from_ymd_opt(2099, 12, 1).unwrap(),
        )
    }

    #[test]
    fn latest_date_prefers_end_date() {
        let mut e = draft();
        assert_eq!(e.latest_date(), e.start_date);
        e.end_date = NaiveDate::from_ymd_opt(2099, 12, 5);
        assert_eq!(e.latest_date(), e.end_date.unwrap());
    }

    #[test]
    fn primary_category_is_first_slug() {
        let mut e = draft();
        assert!(e.primary_category().is_none());
        e.category_slugs = vec!["cultural".to_string(), "social".to_string()];
        assert_eq!(e.primary_category(), Some("cultural"));
    }

    #[test]
    fn location_type_roundtrip() {
        for lt in [
            LocationType::Physical,
            LocationType::Online,
            LocationType::Hybrid,
        ] {
            let parsed: LocationType = lt.to_string().parse().unwrap();
            assert_eq!(parsed, lt);
        }
    }
}
