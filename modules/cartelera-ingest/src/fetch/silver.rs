//! Silver tier: RSS/Atom/iCal feeds, optionally followed by detail-page
//! fetches merged into each record.

use icalendar::{Component, EventLike};
use serde_json::json;
use tracing::{debug, warn};

use cartelera_common::{FeedKind, IngestError, SilverSource};

use super::{extract_fields, HttpFetcher, RawRecord};

pub async fn fetch_silver(
    fetcher: &HttpFetcher,
    cfg: &SilverSource,
) -> Result<Vec<RawRecord>, IngestError> {
    let body = fetcher.limited_get(&cfg.url, &[], true).await?;

    let mut records = match cfg.feed_kind {
        FeedKind::Rss | FeedKind::Atom => parse_syndication(&body)?,
        FeedKind::Ical => parse_ical(&body)?,
    };

    debug!(source = %cfg.meta.slug, entries = records.len(), "feed parsed");

    if cfg.fetch_details && !cfg.field_selectors.is_empty() {
        for record in &mut records {
            let Some(link) = record.get("link").and_then(|l| l.as_str()).map(String::from) else {
                continue;
            };
            match fetcher.limited_get(&link, &[], true).await {
                Ok(html) => {
                    let fields = extract_fields(&html, &cfg.field_selectors);
                    if let Some(map) = record.as_object_mut() {
                        for (field, value) in fields {
                            map.insert(field, serde_json::Value::String(value));
                        }
                    }
                }
                Err(e) => {
                    // One broken detail page doesn't sink the feed.
                    warn!(source = %cfg.meta.slug, url = %link, error = %e, "detail fetch failed");
                }
            }
        }
    }

    Ok(records)
}

/// RSS and Atom share a parser; feed-rs normalizes both.
fn parse_syndication(body: &str) -> Result<Vec<RawRecord>, IngestError> {
    let feed = feed_rs::parser::parse(body.as_bytes())
        .map_err(|e| IngestError::Content(format!("feed parse failed: {e}")))?;

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()));
            let published = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.to_rfc3339());

            json!({
                "id": entry.id,
                "title": entry.title.map(|t| t.content),
                "description": entry.summary.map(|s| s.content),
                "link": link,
                "published": published,
            })
        })
        .collect())
}

fn parse_ical(body: &str) -> Result<Vec<RawRecord>, IngestError> {
    let calendar: icalendar::Calendar = body
        .parse()
        .map_err(|e| IngestError::Content(format!("ical parse failed: {e}")))?;

    let mut records = Vec::new();
    for component in &calendar.components {
        let icalendar::CalendarComponent::Event(event) = component else {
            continue;
        };

        let (start_date, start_time) = split_date_time(event.get_start());
        let (end_date, end_time) = split_date_time(event.get_end());

        records.push(json!({
            "id": event.get_uid(),
            "title": event.get_summary(),
            "description": event.get_description(),
            "link": event.get_url(),
            "venue": event.get_location(),
            "start_date": start_date,
            "start_time": start_time,
            "end_date": end_date,
            "end_time": end_time,
        }));
    }
    Ok(records)
}

/// Flatten an iCal date-or-datetime into ("YYYY-MM-DD", Option<"HH:MM">).
fn split_date_time(
    value: Option<icalendar::DatePerhapsTime>,
) -> (Option<String>, Option<String>) {
    use icalendar::{CalendarDateTime, DatePerhapsTime};

    match value {
        Some(DatePerhapsTime::Date(date)) => (Some(date.format("%Y-%m-%d").to_string()), None),
        Some(DatePerhapsTime::DateTime(cdt)) => {
            let naive = match cdt {
                CalendarDateTime::Floating(naive) => naive,
                CalendarDateTime::Utc(dt) => dt.naive_utc(),
                CalendarDateTime::WithTimezone { date_time, .. } => date_time,
            };
            (
                Some(naive.format("%Y-%m-%d").to_string()),
                Some(naive.format("%H:%M").to_string()),
            )
        }
        None => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Agenda Cultural</title>
    <item>
      <guid>evento-77</guid>
      <title>Concierto de Jazz &amp; Blues</title>
      <link>https://example.es/eventos/77</link>
      <description>El 15 de enero de 2099 en el auditorio</description>
      <pubDate>Mon, 01 Dec 2098 10:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    const ICAL_FIXTURE: &str = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//ES\r\nBEGIN:VEVENT\r\nUID:ev-1@example.es\r\nSUMMARY:Taller de cer\u{e1}mica\r\nDESCRIPTION:Taller familiar\r\nLOCATION:Centro C\u{ed}vico\r\nDTSTART:20990115T183000Z\r\nDTEND:20990115T203000Z\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";

    #[test]
    fn rss_entries_become_records() {
        let records = parse_syndication(RSS_FIXTURE).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "evento-77");
        assert_eq!(records[0]["title"], "Concierto de Jazz & Blues");
        assert_eq!(records[0]["link"], "https://example.es/eventos/77");
    }

    #[test]
    fn ical_events_become_records() {
        let records = parse_ical(ICAL_FIXTURE).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["title"], "Taller de cerámica");
        assert_eq!(records[0]["venue"], "Centro Cívico");
        assert_eq!(records[0]["start_date"], "2099-01-15");
        assert_eq!(records[0]["start_time"], "18:30");
        assert_eq!(records[0]["end_time"], "20:30");
    }

    #[test]
    fn garbage_feed_is_a_content_error() {
        assert!(matches!(
            parse_syndication("not xml at all"),
            Err(IngestError::Content(_))
        ));
    }
}
