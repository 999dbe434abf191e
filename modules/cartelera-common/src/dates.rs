//! Spanish date and time parsing.
//!
//! Sources write dates every way imaginable: "15 de enero de 2025",
//! "15 enero 2025", "15/01/2025", ISO, and day-month with no year. Times show
//! up as "19:30", "19:30h", "19h30", "19h", or "7:30 pm". Everything here is
//! pure and deterministic given the `today` reference date.

use chrono::{Datelike, NaiveDate, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

const SPANISH_MONTHS: &[(&str, u32)] = &[
    ("enero", 1),
    ("ene", 1),
    ("febrero", 2),
    ("feb", 2),
    ("marzo", 3),
    ("mar", 3),
    ("abril", 4),
    ("abr", 4),
    ("mayo", 5),
    ("may", 5),
    ("junio", 6),
    ("jun", 6),
    ("julio", 7),
    ("jul", 7),
    ("agosto", 8),
    ("ago", 8),
    ("septiembre", 9),
    ("sept", 9),
    ("sep", 9),
    ("setembre", 9),
    ("octubre", 10),
    ("oct", 10),
    ("noviembre", 11),
    ("nov", 11),
    ("diciembre", 12),
    ("dic", 12),
];

/// Parse a Spanish month name or abbreviation (case-insensitive).
pub fn parse_spanish_month(s: &str) -> Option<u32> {
    let lowered = crate::text::fold_accents(s).to_lowercase();
    let trimmed = lowered.trim();
    SPANISH_MONTHS
        .iter()
        .find(|(name, _)| *name == trimmed)
        .map(|(_, n)| *n)
}

fn re_written() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "15 de enero de 2025" / "15 enero 2025"
    RE.get_or_init(|| Regex::new(r"(?i)(\d{1,2})\s*(?:de\s+)?([a-záé]+)\s*(?:de\s+)?(\d{4})").unwrap())
}

fn re_dmy() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,2})[/\-](\d{1,2})[/\-](\d{4})").unwrap())
}

fn re_iso() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})[/\-](\d{1,2})[/\-](\d{1,2})").unwrap())
}

fn re_written_no_year() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "15 ene" / "15 de enero", year assumed
    RE.get_or_init(|| Regex::new(r"(?i)(\d{1,2})\s*(?:de\s+)?([a-záé]+)").unwrap())
}

/// Parse a date in any of the common Spanish written forms.
///
/// When the year is missing, assume `today`'s year and roll to the next year
/// if the result would already be in the past; agendas announce upcoming
/// events, not past ones.
pub fn parse_spanish_date(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(cap) = re_written().captures(s) {
        let day: u32 = cap[1].parse().ok()?;
        if let Some(month) = parse_spanish_month(&cap[2]) {
            let year: i32 = cap[3].parse().ok()?;
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                return Some(date);
            }
        }
    }

    if let Some(cap) = re_iso().captures(s) {
        let year: i32 = cap[1].parse().ok()?;
        let month: u32 = cap[2].parse().ok()?;
        let day: u32 = cap[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }

    if let Some(cap) = re_dmy().captures(s) {
        let day: u32 = cap[1].parse().ok()?;
        let month: u32 = cap[2].parse().ok()?;
        let year: i32 = cap[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date);
        }
    }

    if let Some(cap) = re_written_no_year().captures(s) {
        let day: u32 = cap[1].parse().ok()?;
        if let Some(month) = parse_spanish_month(&cap[2]) {
            if let Some(date) = NaiveDate::from_ymd_opt(today.year(), month, day) {
                if date < today {
                    return NaiveDate::from_ymd_opt(today.year() + 1, month, day);
                }
                return Some(date);
            }
        }
    }

    None
}

/// Parse a date with an explicit chrono format string, falling back to the
/// Spanish written forms.
pub fn parse_with_format(input: &str, format: &str, today: NaiveDate) -> Option<NaiveDate> {
    let s = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
        return Some(date);
    }
    // Datetime formats parse into a date by truncation.
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, format) {
        return Some(dt.date());
    }
    parse_spanish_date(s, today)
}

fn re_day_range() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "Del 15 al 20 de enero de 2027" / "15 - 20 de enero"
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,2})\s*(?:al|-|–)\s*(\d{1,2}\s*(?:de\s+)?[a-záé]+(?:\s*(?:de\s+)?\d{4})?)")
            .unwrap()
    })
}

/// Parse a date or a day range ("Del 15 al 20 de enero de 2027").
/// Returns `(start, end)`; a single date yields `(date, None)`.
pub fn parse_date_range(input: &str, today: NaiveDate) -> Option<(NaiveDate, Option<NaiveDate>)> {
    if let Some(cap) = re_day_range().captures(input) {
        let start_day: u32 = cap[1].parse().ok()?;
        if let Some(end) = parse_spanish_date(&cap[2], today) {
            let start = NaiveDate::from_ymd_opt(end.year(), end.month(), start_day)?;
            if start <= end {
                return Some((start, Some(end)));
            }
        }
    }
    parse_spanish_date(input, today).map(|d| (d, None))
}

/// Extract every date found in free text, sorted ascending and deduplicated.
/// Used when a feed entry only carries dates inside its title or body.
pub fn extract_dates(text: &str, today: NaiveDate) -> Vec<NaiveDate> {
    static CANDIDATES: OnceLock<Regex> = OnceLock::new();
    let re = CANDIDATES.get_or_init(|| {
        Regex::new(
            r"(?i)\d{1,2}\s*(?:de\s+)?[a-záé]+\s*(?:de\s+)?\d{4}|\d{4}[/\-]\d{1,2}[/\-]\d{1,2}|\d{1,2}[/\-]\d{1,2}[/\-]\d{4}",
        )
        .unwrap()
    });

    let mut dates: Vec<NaiveDate> = re
        .find_iter(text)
        .filter_map(|m| parse_spanish_date(m.as_str(), today))
        .collect();
    dates.sort();
    dates.dedup();
    dates
}

fn re_hhmm() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d{1,2}):(\d{2})(?:\s*(am|pm))?").unwrap())
}

fn re_h_form() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "19h30", "19 h 30", "19h"
    RE.get_or_init(|| Regex::new(r"(?i)(\d{1,2})\s*h\s*(\d{2})?").unwrap())
}

/// Parse a time of day. A parsed midnight is reported as `None`: the feeds
/// that emit `00:00` mean "time unknown", not "at midnight".
pub fn parse_time(input: &str) -> Option<NaiveTime> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }

    let parsed = if let Some(cap) = re_hhmm().captures(s) {
        let mut hour: u32 = cap[1].parse().ok()?;
        let minute: u32 = cap[2].parse().ok()?;
        match cap.get(3).map(|m| m.as_str().to_lowercase()) {
            Some(p) if p == "pm" && hour < 12 => hour += 12,
            Some(p) if p == "am" && hour == 12 => hour = 0,
            _ => {}
        }
        NaiveTime::from_hms_opt(hour, minute, 0)
    } else if let Some(cap) = re_h_form().captures(s) {
        let hour: u32 = cap[1].parse().ok()?;
        let minute: u32 = cap.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        NaiveTime::from_hms_opt(hour, minute, 0)
    } else {
        None
    }?;

    if parsed == NaiveTime::MIN {
        return None;
    }
    Some(parsed)
}

/// Parse a "19:30 - 21:00" or "19:30 a 21:00" range; single times yield
/// `(start, None)`.
pub fn parse_time_range(input: &str) -> (Option<NaiveTime>, Option<NaiveTime>) {
    static SEP: OnceLock<Regex> = OnceLock::new();
    let sep = SEP.get_or_init(|| Regex::new(r"\s+(?:-|–|a)\s+").unwrap());

    let mut parts = sep.splitn(input, 2);
    let start = parts.next().and_then(parse_time);
    let end = parts.next().and_then(parse_time);
    (start, end)
}
