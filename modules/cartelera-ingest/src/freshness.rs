//! Freshness filter: past events never reach enrichment or the store.

use chrono::NaiveDate;

use cartelera_common::EventDraft;

/// An event stays when its latest meaningful date (end, else start) is today
/// or later. `today` is the host's local civil date.
pub fn is_future_or_ongoing(event: &EventDraft, today: NaiveDate) -> bool {
    event.latest_date() >= today
}

/// Split a batch into (kept, dropped-count).
pub fn filter_fresh(events: Vec<EventDraft>, today: NaiveDate) -> (Vec<EventDraft>, u32) {
    let mut kept = Vec::with_capacity(events.len());
    let mut dropped = 0;
    for event in events {
        if is_future_or_ongoing(&event, today) {
            kept.push(event);
        } else {
            dropped += 1;
        }
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartelera_common::SourceTier;

    fn event_on(start: NaiveDate) -> EventDraft {
        EventDraft::new("src", SourceTier::Gold, "e", "Evento", start)
    }

    #[test]
    fn yesterday_dropped_today_and_tomorrow_kept() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let events = vec![
            event_on(today.pred_opt().unwrap()),
            event_on(today),
            event_on(today.succ_opt().unwrap()),
        ];
        let (kept, dropped) = filter_fresh(events, today);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn ongoing_event_kept_via_end_date() {
        let today = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        let mut event = event_on(NaiveDate::from_ymd_opt(2026, 7, 20).unwrap());
        event.end_date = NaiveDate::from_ymd_opt(2026, 8, 10);
        assert!(is_future_or_ongoing(&event, today));

        event.end_date = NaiveDate::from_ymd_opt(2026, 7, 25);
        assert!(!is_future_or_ongoing(&event, today));
    }
}
