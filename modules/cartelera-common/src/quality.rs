//! Quality scoring for cross-source merges.
//!
//! A fixed weights table over populated fields. The deduplicator uses the
//! score to decide whether a new source's record improves a persisted event.

use crate::events::EventDraft;

pub const W_DESCRIPTION: i32 = 10;
pub const W_IMAGE: i32 = 8;
pub const W_COORDINATES: i32 = 7;
pub const W_PRICE_INFO: i32 = 5;
pub const W_END_DATE: i32 = 5;
pub const W_ORGANIZER: i32 = 4;
pub const W_START_TIME: i32 = 3;
pub const W_END_TIME: i32 = 3;
pub const W_CATEGORY: i32 = 3;
pub const W_EXTERNAL_URL: i32 = 2;

/// Description only counts when it carries real content.
pub const DESCRIPTION_MIN_CHARS: usize = 50;

/// Minimum estimated improvement for a merge to be worth an update.
pub const MIN_IMPROVEMENT: i32 = 5;

/// Fields the deduplicator may copy from a new record into an existing one.
pub const MERGEABLE_FIELDS: &[&str] = &[
    "description",
    "summary",
    "image_url",
    "source_image_url",
    "end_date",
    "start_time",
    "end_time",
    "price_info",
    "is_free",
    "latitude",
    "longitude",
    "organizer",
    "venue_name",
    "address",
    "external_url",
    "category_slugs",
    "postal_code",
];

/// Weight of a single field name, 0 for unweighted fields.
pub fn field_weight(field: &str) -> i32 {
    match field {
        "description" => W_DESCRIPTION,
        "image_url" | "source_image_url" => W_IMAGE,
        "latitude" | "longitude" => W_COORDINATES,
        "price_info" => W_PRICE_INFO,
        "end_date" => W_END_DATE,
        "organizer" => W_ORGANIZER,
        "start_time" => W_START_TIME,
        "end_time" => W_END_TIME,
        "category_slugs" => W_CATEGORY,
        "external_url" => W_EXTERNAL_URL,
        _ => 0,
    }
}

/// Weighted sum of populated fields.
pub fn quality_score(event: &EventDraft) -> i32 {
    let mut score = 0;

    if event
        .description
        .as_deref()
        .is_some_and(|d| d.len() > DESCRIPTION_MIN_CHARS)
    {
        score += W_DESCRIPTION;
    }
    if event.has_image() {
        score += W_IMAGE;
    }
    if event.has_coordinates() {
        score += W_COORDINATES;
    }
    if event.price_info.is_some() {
        score += W_PRICE_INFO;
    }
    if event.end_date.is_some() {
        score += W_END_DATE;
    }
    if event.organizer.is_some() {
        score += W_ORGANIZER;
    }
    if event.start_time.is_some() {
        score += W_START_TIME;
    }
    if event.end_time.is_some() {
        score += W_END_TIME;
    }
    if !event.category_slugs.is_empty() {
        score += W_CATEGORY;
    }
    if event.external_url.is_some() {
        score += W_EXTERNAL_URL;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceTier;
    use chrono::{NaiveDate, NaiveTime};

    fn bare() -> EventDraft {
        EventDraft::new(
            "src",
            SourceTier::Gold,
            "x1",
            "Feria del Libro",
            NaiveDate::from_ymd_opt(2099, 5, 10).unwrap(),
        )
    }

    #[test]
    fn empty_event_scores_zero() {
        assert_eq!(quality_score(&bare()), 0);
    }

    #[test]
    fn short_description_does_not_count() {
        let mut e = bare();
        e.description = Some("corta".to_string());
        assert_eq!(quality_score(&e), 0);
        e.description = Some("x".repeat(DESCRIPTION_MIN_CHARS + 1));
        assert_eq!(quality_score(&e), W_DESCRIPTION);
    }

    #[test]
    fn full_event_sums_all_weights() {
        let mut e = bare();
        e.description = Some("d".repeat(100));
        e.image_url = Some("https://img.example/e.jpg".to_string());
        e.latitude = Some(40.4);
        e.longitude = Some(-3.7);
        e.price_info = Some("10-15 EUR".to_string());
        e.end_date = NaiveDate::from_ymd_opt(2099, 5, 12);
        e.organizer = Some(crate::events::Organizer {
            name: "Ayuntamiento".to_string(),
            ..Default::default()
        });
        e.start_time = NaiveTime::from_hms_opt(19, 30, 0);
        e.end_time = NaiveTime::from_hms_opt(21, 0, 0);
        e.category_slugs = vec!["cultural".to_string()];
        e.external_url = Some("https://example.es/evento".to_string());
        assert_eq!(
            quality_score(&e),
            W_DESCRIPTION
                + W_IMAGE
                + W_COORDINATES
                + W_PRICE_INFO
                + W_END_DATE
                + W_ORGANIZER
                + W_START_TIME
                + W_END_TIME
                + W_CATEGORY
                + W_EXTERNAL_URL
        );
    }

    #[test]
    fn coordinates_require_both_axes() {
        let mut e = bare();
        e.latitude = Some(40.4);
        assert_eq!(quality_score(&e), 0);
    }
}
