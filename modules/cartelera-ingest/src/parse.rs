//! Raw-to-normalized mapping.
//!
//! Deterministic per source config: dotted-path field extraction for Gold,
//! standard feed keys for Silver, selector output for Bronze. Produces a
//! normalized `EventDraft` or nothing when required fields are missing;
//! a dropped record is counted by the pipeline, never an error.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;

use cartelera_common::text::{fingerprint, normalize, squeeze_whitespace, unescape_entities};
use cartelera_common::{
    dates, BronzeSource, EventDraft, GoldSource, Organizer, SilverSource, SourceConfig, SourceTier,
};

use crate::fetch::gold::value_at;
use crate::fetch::RawRecord;

pub struct Parser {
    today: NaiveDate,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            today: Local::now().date_naive(),
        }
    }

    /// Pin the reference date (tests and backfills).
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn parse(&self, config: &SourceConfig, raw: &RawRecord) -> Option<EventDraft> {
        let event = match config {
            SourceConfig::Gold(cfg) => self.parse_gold(cfg, raw),
            SourceConfig::Silver(cfg) => self.parse_silver(cfg, raw),
            SourceConfig::Bronze(cfg) => self.parse_bronze(cfg, raw),
        };

        event.map(finish)
    }

    fn parse_gold(&self, cfg: &GoldSource, raw: &RawRecord) -> Option<EventDraft> {
        let mapped = |field: &str| -> Option<String> {
            cfg.field_mappings
                .iter()
                .find(|(_, target)| target.as_str() == field)
                .and_then(|(path, _)| value_to_string(value_at(raw, path)?))
        };

        let title = clean_text(&mapped("title")?)?;
        let start_raw = mapped("start_date")?;
        let start_date = self.parse_date_value(&start_raw, cfg)?;

        let venue_name = mapped("venue_name").and_then(|v| clean_text(&v));
        let external_id = mapped("external_id").filter(|id| !id.trim().is_empty());
        let synthetic = external_id.is_none();
        let external_id = external_id
            .unwrap_or_else(|| synthesize_external_id(&title, start_date, venue_name.as_deref()));

        let mut event = EventDraft::new(&cfg.meta.slug, SourceTier::Gold, external_id, title, start_date);
        event.synthetic_id = synthetic;

        event.end_date = mapped("end_date").and_then(|v| self.parse_date_value(&v, cfg));
        event.start_time = mapped("start_time")
            .and_then(|v| dates::parse_time(&v))
            .or_else(|| time_from_datetime(&start_raw, &cfg.datetime_format));
        event.end_time = mapped("end_time").and_then(|v| dates::parse_time(&v));

        event.description = mapped("description").and_then(|v| clean_text(&v));
        event.external_url = mapped("external_url");
        event.source_image_url = mapped("image_url").map(|img| prefix_url(&img, &cfg.image_url_prefix));

        event.venue_name = venue_name;
        event.address = mapped("address").and_then(|v| clean_text(&v));
        event.city = mapped("city").and_then(|v| clean_text(&v));
        event.postal_code = mapped("postal_code");
        event.province = mapped("province")
            .and_then(|v| clean_text(&v))
            .or_else(|| cfg.default_province.clone());
        event.region = Some(cfg.meta.region.clone());

        event.organizer = mapped("organizer_name")
            .and_then(|v| clean_text(&v))
            .map(|name| Organizer {
                name,
                ..Default::default()
            });

        // Price: a dedicated boolean field wins; otherwise the literal
        // free-marker value on the price field.
        let price_text = mapped("price").or_else(|| mapped("price_info"));
        if let Some(free_field) = &cfg.free_field {
            event.is_free = value_at(raw, free_field).and_then(|v| v.as_bool());
        }
        if let Some(text) = &price_text {
            if event.is_free.is_none() {
                if let Some(free_value) = &cfg.free_value {
                    if text.trim().eq_ignore_ascii_case(free_value) {
                        event.is_free = Some(true);
                    }
                }
            }
            if event.is_free != Some(true) {
                if let Some(amount) = parse_price(text) {
                    event.price = Some(amount);
                    event.is_free = Some(amount == 0.0);
                } else {
                    event.price_info = clean_text(text);
                }
            }
        }

        Some(event)
    }

    fn parse_silver(&self, cfg: &SilverSource, raw: &RawRecord) -> Option<EventDraft> {
        let get = |key: &str| raw.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let title = clean_text(&get("title")?)?;
        let description = get("description").and_then(|d| clean_text(&d));

        // Explicit dates (iCal) win; otherwise scan title + body for written
        // Spanish dates.
        let (start_date, end_date) = match get("start_date") {
            Some(s) => (
                dates::parse_with_format(&s, "%Y-%m-%d", self.today)?,
                get("end_date").and_then(|e| dates::parse_with_format(&e, "%Y-%m-%d", self.today)),
            ),
            None => {
                let haystack = format!("{} {}", title, description.as_deref().unwrap_or(""));
                let found = dates::extract_dates(&haystack, self.today);
                let start = *found.first()?;
                let end = found.last().copied().filter(|&d| d > start);
                (start, end)
            }
        };

        let venue_name = get("venue").and_then(|v| clean_text(&v));
        let external_id = get("id").filter(|id| !id.trim().is_empty());
        let synthetic = external_id.is_none();
        let external_id = external_id
            .unwrap_or_else(|| synthesize_external_id(&title, start_date, venue_name.as_deref()));

        let mut event =
            EventDraft::new(&cfg.meta.slug, SourceTier::Silver, external_id, title, start_date);
        event.synthetic_id = synthetic;
        event.end_date = end_date;
        event.start_time = get("start_time").and_then(|t| dates::parse_time(&t));
        event.end_time = get("end_time").and_then(|t| dates::parse_time(&t));
        event.description = description;
        event.external_url = get("link");
        event.venue_name = venue_name;
        event.source_image_url = get("image");
        event.city = get("city").and_then(|c| clean_text(&c));
        event.region = Some(cfg.meta.region.clone());

        Some(event)
    }

    fn parse_bronze(&self, cfg: &BronzeSource, raw: &RawRecord) -> Option<EventDraft> {
        let get = |key: &str| raw.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let title = clean_text(&get("title")?)?;
        let date_text = get("date")?;
        let (start_date, end_date) = dates::parse_date_range(&date_text, self.today)?;

        let venue_name = get("venue").and_then(|v| clean_text(&v));
        let external_id = get("link")
            .map(|link| format!("{:016x}", fingerprint(&link)))
            .unwrap_or_else(|| synthesize_external_id(&title, start_date, venue_name.as_deref()));

        let mut event =
            EventDraft::new(&cfg.meta.slug, SourceTier::Bronze, external_id, title, start_date);
        event.synthetic_id = true;
        event.end_date = end_date;
        event.start_time = dates::parse_time(&date_text);
        event.description = get("description").and_then(|d| clean_text(&d));
        event.external_url = get("link");
        event.source_image_url = get("image");
        event.venue_name = venue_name;
        event.city = get("city").and_then(|c| clean_text(&c)).or_else(|| cfg.city.clone());
        event.province = get("province").or_else(|| cfg.province.clone());
        event.region = Some(cfg.meta.region.clone());

        Some(event)
    }

    fn parse_date_value(&self, value: &str, cfg: &GoldSource) -> Option<NaiveDate> {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value.trim(), &cfg.datetime_format) {
            return Some(dt.date());
        }
        dates::parse_with_format(value, &cfg.date_format, self.today)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Final consistency pass applied to every parsed event.
fn finish(mut event: EventDraft) -> EventDraft {
    if event.end_date.is_some_and(|end| end < event.start_date) {
        debug!(title = %event.title, "end_date before start_date, dropping end");
        event.end_date = None;
    }
    event.all_day = event.start_time.is_none();
    event
}

/// Unescape entities and squeeze whitespace; empty results become None.
fn clean_text(text: &str) -> Option<String> {
    let cleaned = squeeze_whitespace(&unescape_entities(text));
    (!cleaned.is_empty()).then_some(cleaned)
}

fn value_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Time component of a datetime field. Midnight is "time unknown".
fn time_from_datetime(value: &str, datetime_format: &str) -> Option<NaiveTime> {
    let dt = NaiveDateTime::parse_from_str(value.trim(), datetime_format).ok()?;
    let time = dt.time();
    (time != NaiveTime::MIN).then_some(time)
}

/// Numeric price from strings like "12", "12.50", "12,50 €".
fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if cleaned.is_empty() || cleaned.len() != text.trim().trim_end_matches(['€', '$']).trim().len() {
        // Mixed text ("desde 10 €, gratis socios") is price_info, not a price.
        return None;
    }
    cleaned.replace(',', ".").parse().ok()
}

/// Stable hash of title + date + venue for sources without ids.
pub fn synthesize_external_id(title: &str, start_date: NaiveDate, venue: Option<&str>) -> String {
    let key = format!(
        "{}|{}|{}",
        normalize(title),
        start_date,
        venue.map(normalize).unwrap_or_default()
    );
    format!("{:016x}", fingerprint(&key))
}

fn prefix_url(url: &str, prefix: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || prefix.is_empty() {
        url.to_string()
    } else {
        format!("{}{}", prefix.trim_end_matches('/'), url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartelera_common::SourceMeta;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn meta(slug: &str) -> SourceMeta {
        SourceMeta {
            slug: slug.to_string(),
            name: slug.to_string(),
            region: "Comunidad de Madrid".to_string(),
            region_code: "MD".to_string(),
            is_active: true,
        }
    }

    fn gold_config() -> GoldSource {
        let mut cfg = GoldSource::new(meta("madrid_datos_abiertos"), "https://example.es/api");
        cfg.field_mappings = BTreeMap::from([
            ("id".to_string(), "external_id".to_string()),
            ("title".to_string(), "title".to_string()),
            ("description".to_string(), "description".to_string()),
            ("dtstart".to_string(), "start_date".to_string()),
            ("dtend".to_string(), "end_date".to_string()),
            ("address.locality".to_string(), "city".to_string()),
            ("address.street".to_string(), "address".to_string()),
            ("event-location".to_string(), "venue_name".to_string()),
            ("price".to_string(), "price".to_string()),
            ("link".to_string(), "external_url".to_string()),
        ]);
        cfg.datetime_format = "%Y-%m-%d %H:%M:%S%.1f".to_string();
        cfg
    }

    fn parser() -> Parser {
        Parser::with_today(NaiveDate::from_ymd_opt(2026, 8, 1).unwrap())
    }

    #[test]
    fn gold_round_trip_keeps_identity_and_required_fields() {
        let raw = json!({
            "id": "m1",
            "title": "Concierto de Jazz",
            "description": "Una noche de jazz en el auditorio",
            "dtstart": "2099-12-01 19:30:00.0",
            "address": {"locality": "Madrid", "street": "Calle Mayor 1"},
            "event-location": "Auditorio Nacional",
            "price": "Gratuito",
            "link": "https://example.es/eventos/m1"
        });

        let event = parser()
            .parse(&SourceConfig::Gold(gold_config()), &raw)
            .expect("should parse");

        assert_eq!(event.external_id, "m1");
        assert!(!event.synthetic_id);
        assert_eq!(event.title, "Concierto de Jazz");
        assert_eq!(event.start_date, NaiveDate::from_ymd_opt(2099, 12, 1).unwrap());
        assert_eq!(event.start_time, NaiveTime::from_hms_opt(19, 30, 0));
        assert_eq!(event.city.as_deref(), Some("Madrid"));
        assert_eq!(event.venue_name.as_deref(), Some("Auditorio Nacional"));
        assert_eq!(event.is_free, Some(true));
        assert!(event.price.is_none());
        assert!(!event.all_day);
    }

    #[test]
    fn gold_midnight_start_means_time_unknown() {
        let raw = json!({
            "id": "m2",
            "title": "Exposición",
            "dtstart": "2099-12-01 00:00:00.0",
        });
        let event = parser()
            .parse(&SourceConfig::Gold(gold_config()), &raw)
            .unwrap();
        assert!(event.start_time.is_none());
        assert!(event.all_day);
    }

    #[test]
    fn gold_numeric_price_parses() {
        let raw = json!({
            "id": "m3",
            "title": "Ópera",
            "dtstart": "2099-12-01 19:00:00.0",
            "price": "12,50"
        });
        let event = parser()
            .parse(&SourceConfig::Gold(gold_config()), &raw)
            .unwrap();
        assert_eq!(event.price, Some(12.5));
        assert_eq!(event.is_free, Some(false));
    }

    #[test]
    fn gold_mixed_price_text_becomes_price_info() {
        let raw = json!({
            "id": "m4",
            "title": "Teatro",
            "dtstart": "2099-12-01 19:00:00.0",
            "price": "desde 10 €, gratis para socios"
        });
        let event = parser()
            .parse(&SourceConfig::Gold(gold_config()), &raw)
            .unwrap();
        assert!(event.price.is_none());
        assert!(event.price_info.is_some());
        assert!(event.is_free.is_none());
    }

    #[test]
    fn gold_missing_title_drops_record() {
        let raw = json!({"id": "m5", "dtstart": "2099-12-01 19:00:00.0"});
        assert!(parser().parse(&SourceConfig::Gold(gold_config()), &raw).is_none());
    }

    #[test]
    fn gold_missing_id_synthesizes_deterministically() {
        let cfg = {
            let mut c = gold_config();
            c.field_mappings.remove("id");
            c
        };
        let raw = json!({
            "title": "Feria",
            "dtstart": "2099-12-01 10:00:00.0",
            "event-location": "Plaza Mayor"
        });
        let a = parser().parse(&SourceConfig::Gold(cfg.clone()), &raw).unwrap();
        let b = parser().parse(&SourceConfig::Gold(cfg), &raw).unwrap();
        assert!(a.synthetic_id);
        assert_eq!(a.external_id, b.external_id);
    }

    #[test]
    fn end_before_start_is_dropped() {
        let raw = json!({
            "id": "m6",
            "title": "Ciclo",
            "dtstart": "2099-12-10 19:00:00.0",
            "dtend": "2099-12-01 19:00:00.0",
        });
        let event = parser()
            .parse(&SourceConfig::Gold(gold_config()), &raw)
            .unwrap();
        assert!(event.end_date.is_none());
    }

    #[test]
    fn silver_dates_come_from_text_when_missing() {
        let cfg = SilverSource {
            meta: meta("zaragoza_agenda"),
            url: "https://example.es/rss".to_string(),
            feed_kind: cartelera_common::FeedKind::Rss,
            fetch_details: false,
            field_selectors: BTreeMap::new(),
        };
        let raw = json!({
            "id": "evento-77",
            "title": "Concierto el 15 de enero de 2099",
            "description": "Hasta el 20 de enero de 2099 en el auditorio",
            "link": "https://example.es/eventos/77"
        });
        let event = parser().parse(&SourceConfig::Silver(cfg), &raw).unwrap();
        assert_eq!(event.start_date, NaiveDate::from_ymd_opt(2099, 1, 15).unwrap());
        assert_eq!(event.end_date, NaiveDate::from_ymd_opt(2099, 1, 20));
        assert_eq!(event.external_id, "evento-77");
    }

    #[test]
    fn bronze_parses_range_and_synthesizes_id() {
        let cfg = BronzeSource {
            meta: meta("viralagenda_valladolid"),
            listing_url: "https://example.es/eventos".to_string(),
            province: Some("Valladolid".to_string()),
            city: Some("Valladolid".to_string()),
            use_renderer: true,
            wait_for: None,
            card_selector: ".evento".to_string(),
            title_selector: ".titulo".to_string(),
            date_selector: ".fecha".to_string(),
            link_selector: "a".to_string(),
            image_selector: "img".to_string(),
            fetch_details: false,
            max_pages: 1,
        };
        let raw = json!({
            "title": "Festa do Marisco",
            "date": "Del 15 al 20 de enero de 2099",
            "link": "https://example.es/eventos/marisco",
        });
        let event = parser().parse(&SourceConfig::Bronze(cfg), &raw).unwrap();
        assert_eq!(event.start_date, NaiveDate::from_ymd_opt(2099, 1, 15).unwrap());
        assert_eq!(event.end_date, NaiveDate::from_ymd_opt(2099, 1, 20));
        assert!(event.synthetic_id);
        assert_eq!(event.city.as_deref(), Some("Valladolid"));
    }

    #[test]
    fn entities_are_unescaped() {
        let raw = json!({
            "id": "m7",
            "title": "Mar&iacute;a &amp; Jos&eacute;",
            "dtstart": "2099-12-01 19:00:00.0",
        });
        let event = parser()
            .parse(&SourceConfig::Gold(gold_config()), &raw)
            .unwrap();
        assert_eq!(event.title, "María & José");
    }
}
