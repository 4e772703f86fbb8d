//! Rebuild daily institutional snapshots from the per-stock history files.
//!
//! For each weekday D the snapshot holds, per stock, the newest
//! `SNAPSHOT_DAYS` history dates on or before D, re-keyed to ROC dates: the
//! same shape a daily `institutional` crawl of D would have written.

use crate::calendar::{is_trading_day, DateConvention};
use crate::models::{DatedRecord, ItemState};
use chrono::NaiveDate;

/// Days of history a daily institutional page shows.
pub const SNAPSHOT_DAYS: usize = 30;

/// Weekdays in `start..=end`.
pub fn trading_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| is_trading_day(*d))
        .collect()
}

/// `history` (Gregorian keys) as of `date`: at most `days` newest entries not
/// after `date`, keyed in `to`.
pub fn snapshot_as_of(history: &DatedRecord, date: NaiveDate, days: usize, to: DateConvention) -> DatedRecord {
    let cutoff = DateConvention::Gregorian.format_key(date);
    history
        .range(..=cutoff)
        .rev()
        .take(days)
        .filter_map(|(key, payload)| {
            let day = DateConvention::Gregorian.parse_key(key)?;
            Some((to.format_key(day), payload.clone()))
        })
        .collect()
}

/// Snapshot entry for one stock, or `None` when it has no data up to `date`.
pub fn snapshot_item(display_name: &str, history: &ItemState, date: NaiveDate) -> Option<ItemState> {
    let dated = snapshot_as_of(&history.dated, date, SNAPSHOT_DAYS, DateConvention::Roc);
    (!dated.is_empty()).then(|| ItemState {
        display_name: display_name.to_string(),
        dated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use chrono::Datelike;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn history(days: impl IntoIterator<Item = NaiveDate>) -> DatedRecord {
        days.into_iter()
            .map(|d| {
                let payload: Payload = json!({"ForeignInvestors": d.day()}).as_object().cloned().unwrap();
                (DateConvention::Gregorian.format_key(d), payload)
            })
            .collect()
    }

    #[test]
    fn test_trading_days_skip_weekends() {
        let days = trading_days(ymd(2026, 2, 5), ymd(2026, 2, 10));
        assert_eq!(days, vec![ymd(2026, 2, 5), ymd(2026, 2, 6), ymd(2026, 2, 9), ymd(2026, 2, 10)]);
        assert!(trading_days(ymd(2026, 2, 10), ymd(2026, 2, 5)).is_empty());
    }

    #[test]
    fn test_snapshot_keeps_newest_days_up_to_date_in_roc() {
        let all = history(trading_days(ymd(2025, 12, 1), ymd(2026, 2, 27)));
        let snap = snapshot_as_of(&all, ymd(2026, 2, 5), SNAPSHOT_DAYS, DateConvention::Roc);

        assert_eq!(snap.len(), SNAPSHOT_DAYS);
        assert_eq!(snap.keys().next_back().map(String::as_str), Some("115/02/05"));
        assert!(!snap.contains_key("115/02/06"));
        assert_eq!(snap["115/02/05"]["ForeignInvestors"], 5);
    }

    #[test]
    fn test_weekend_date_uses_friday_and_no_data_is_none() {
        let all = ItemState {
            display_name: String::new(),
            dated: history([ymd(2026, 2, 5), ymd(2026, 2, 6)]),
        };
        let saturday = snapshot_item("台積電", &all, ymd(2026, 2, 7)).unwrap();
        assert_eq!(saturday.display_name, "台積電");
        assert_eq!(saturday.dated.keys().next_back().map(String::as_str), Some("115/02/06"));

        assert!(snapshot_item("台積電", &all, ymd(2026, 2, 4)).is_none());
    }
}
