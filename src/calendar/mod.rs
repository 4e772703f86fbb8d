//! Trading-calendar helpers: target-date resolution, weekday checks and the
//! two date-key conventions used by the portal (Gregorian and ROC/Minguo).

use chrono::{DateTime, Datelike, FixedOffset, Months, NaiveDate, Offset, Timelike, Utc, Weekday};

/// ROC (Minguo) year 1 is Gregorian 1912.
const ROC_EPOCH_OFFSET: i32 = 1911;

/// Date the crawl should target, given the wall clock.
///
/// Before `cutoff_hour` (local time at `utc_offset_hours`) the exchange has not
/// published today's numbers yet, so yesterday is the target. The boundary is
/// inclusive on the "today" side: 14:00 with a cutoff of 14 yields today.
pub fn resolve_target_date(now: DateTime<Utc>, utc_offset_hours: i32, cutoff_hour: u32) -> NaiveDate {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
    let local = now.with_timezone(&offset);
    let today = local.date_naive();

    if local.hour() < cutoff_hour {
        today.pred_opt().unwrap_or(today)
    } else {
        today
    }
}

/// Weekdays only. Exchange holidays are not modeled.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Default institutional window start: same day one month earlier, clamped
/// to the end of a shorter month.
pub fn one_month_before(date: NaiveDate) -> NaiveDate {
    date.checked_sub_months(Months::new(1)).unwrap_or(date)
}

/// `20260205`, used in file names.
pub fn compact(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `2026-2-5`, the form the portal expects in query strings.
pub fn to_param_date(date: NaiveDate) -> String {
    format!("{}-{}-{}", date.year(), date.month(), date.day())
}

/// Accepts `YYYYMMDD`, `YYYY-M-D`, `YYYY-MM-DD` and `YYYY/MM/DD`.
pub fn parse_cli_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(s, "%Y%m%d").ok();
    }

    let parts: Vec<&str> = s.split(['-', '/']).collect();
    if parts.len() != 3 {
        return None;
    }
    let y: i32 = parts[0].parse().ok()?;
    let m: u32 = parts[1].parse().ok()?;
    let d: u32 = parts[2].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

// ── Date-key conventions ──────────────────────────────────────────────────────

/// How a category spells its date keys on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateConvention {
    /// `YYYY/MM/DD`
    Gregorian,
    /// `YYY/MM/DD` with year = Gregorian − 1911
    Roc,
}

impl DateConvention {
    pub fn format_key(self, date: NaiveDate) -> String {
        match self {
            DateConvention::Gregorian => date.format("%Y/%m/%d").to_string(),
            DateConvention::Roc => format!(
                "{}/{:02}/{:02}",
                date.year() - ROC_EPOCH_OFFSET,
                date.month(),
                date.day()
            ),
        }
    }

    pub fn parse_key(self, key: &str) -> Option<NaiveDate> {
        let (y, m, d) = split_ymd(key)?;
        let year = match self {
            DateConvention::Gregorian => y,
            DateConvention::Roc => y + ROC_EPOCH_OFFSET,
        };
        NaiveDate::from_ymd_opt(year, m, d)
    }

    /// True only for well-formed, zero-padded keys, so that lexicographic
    /// order over stored keys stays chronological.
    pub fn is_key(self, key: &str) -> bool {
        self.parse_key(key)
            .map(|d| self.format_key(d) == key)
            .unwrap_or(false)
    }
}

fn split_ymd(s: &str) -> Option<(i32, u32, u32)> {
    let mut it = s.trim().split('/');
    let y = it.next()?.parse().ok()?;
    let m = it.next()?.parse().ok()?;
    let d = it.next()?.parse().ok()?;
    if it.next().is_some() {
        return None;
    }
    Some((y, m, d))
}
