//! Raw page rows → dated records, including the freshness checks that decide
//! whether the portal has published the requested day yet.

use crate::calendar::DateConvention;
use crate::error::ExtractError;
use crate::models::{DatedRecord, FetchRequest, Payload};
use chrono::NaiveDate;
use serde_json::Value;

use super::parsers::{RawInstitutionalRow, SmaReading};

// ── Parsers ───────────────────────────────────────────────────────────────────

/// "1,234" → 1234. Anything unparseable counts as 0, like the portal's blanks.
pub fn parse_count(s: &str) -> i64 {
    s.trim().replace(',', "").parse().unwrap_or(0)
}

/// Portal dates are `YYY/MM/DD` (ROC) or `YYYY/MM/DD`; years below 1911 are ROC.
pub fn parse_portal_date(s: &str) -> Option<NaiveDate> {
    let mut it = s.trim().split('/');
    let y: i32 = it.next()?.parse().ok()?;
    let m: u32 = it.next()?.parse().ok()?;
    let d: u32 = it.next()?.parse().ok()?;
    let year = if y < 1911 { y + 1911 } else { y };
    NaiveDate::from_ymd_opt(year, m, d)
}

// ── Institutional rows → DatedRecord ──────────────────────────────────────────

/// Rows arrive newest first. With strict freshness the newest row must be the
/// requested end date, and that row must not be mostly zeros.
///
/// The zero test is a heuristic for "not yet populated": a day on which two
/// of the three investor groups genuinely traded nothing is misread as stale.
pub fn institutional_rows_to_record(
    rows: &[RawInstitutionalRow],
    request: &FetchRequest,
) -> Result<DatedRecord, ExtractError> {
    let conv = request.convention;
    let mut record = DatedRecord::new();

    for (i, row) in rows.iter().enumerate() {
        let date = parse_portal_date(&row.date)
            .ok_or_else(|| ExtractError::Parse(format!("bad date {:?}", row.date)))?;

        let foreign = parse_count(&row.foreign);
        let trust = parse_count(&row.trust);
        let dealers = parse_count(&row.dealers);
        let total = parse_count(&row.total);

        if request.strict_freshness {
            if i == 0 && date != request.end {
                return Err(ExtractError::NotExpectedDate {
                    expected: request.target_key(),
                    found: conv.format_key(date),
                });
            }
            let zeros = [foreign, trust, dealers].iter().filter(|v| **v == 0).count();
            if date == request.end && zeros >= 2 {
                return Err(ExtractError::DataZero { date: request.target_key() });
            }
        }

        let mut payload = Payload::new();
        payload.insert("ForeignInvestors".into(), Value::from(foreign));
        payload.insert("InvestmentTrust".into(), Value::from(trust));
        payload.insert("Dealers".into(), Value::from(dealers));
        payload.insert("DailyTotal".into(), Value::from(total));
        record.insert(conv.format_key(date), payload);
    }

    if record.is_empty() {
        return Err(ExtractError::NotFound("no dated rows under the header".into()));
    }
    Ok(record)
}

// ── SMA legend → DatedRecord ──────────────────────────────────────────────────

pub fn sma_reading_to_record(reading: &SmaReading, request: &FetchRequest) -> Result<DatedRecord, ExtractError> {
    let raw_date = reading
        .date
        .as_deref()
        .ok_or_else(|| ExtractError::NotFound("chart date (.opsBtmTitleK)".into()))?;
    let date = DateConvention::Gregorian
        .parse_key(raw_date)
        .ok_or_else(|| ExtractError::Parse(format!("bad chart date {:?}", raw_date)))?;

    if request.strict_freshness && date != request.end {
        return Err(ExtractError::NotExpectedDate {
            expected: request.target_key(),
            found: request.convention.format_key(date),
        });
    }
    if reading.values.is_empty() {
        return Err(ExtractError::NotFound("SMA legend".into()));
    }

    let payload: Payload = reading
        .values
        .iter()
        .map(|(label, value)| (label.clone(), Value::String(value.clone())))
        .collect();

    let mut record = DatedRecord::new();
    record.insert(request.convention.format_key(date), payload);
    Ok(record)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request(category: Category, strict: bool) -> FetchRequest {
        FetchRequest {
            category,
            start: ymd(2026, 1, 5),
            end: ymd(2026, 2, 5),
            convention: category.profile().convention,
            strict_freshness: strict,
        }
    }

    fn row(date: &str, f: &str, t: &str, d: &str, total: &str) -> RawInstitutionalRow {
        RawInstitutionalRow {
            date: date.into(),
            foreign: f.into(),
            trust: t.into(),
            dealers: d.into(),
            total: total.into(),
        }
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1,234"), 1234);
        assert_eq!(parse_count("-3,001"), -3001);
        assert_eq!(parse_count("--"), 0);
    }

    #[test]
    fn test_parse_portal_date_converts_roc() {
        assert_eq!(parse_portal_date("115/02/05"), Some(ymd(2026, 2, 5)));
        assert_eq!(parse_portal_date("2026/02/05"), Some(ymd(2026, 2, 5)));
        assert_eq!(parse_portal_date("115/13/05"), None);
    }

    #[test]
    fn test_institutional_rows_keyed_roc() {
        let rows = vec![row("115/02/05", "1,200", "15", "-3", "1,212"), row("115/02/04", "-300", "0", "7", "-293")];
        let rec = institutional_rows_to_record(&rows, &request(Category::Institutional, true)).unwrap();
        assert_eq!(rec.len(), 2);
        assert_eq!(rec["115/02/05"]["ForeignInvestors"], 1200);
        assert_eq!(rec["115/02/04"]["DailyTotal"], -293);
    }

    #[test]
    fn test_history_rows_keyed_gregorian_without_checks() {
        let rows = vec![row("115/02/04", "0", "0", "5", "5")];
        let rec = institutional_rows_to_record(&rows, &request(Category::InstitutionalHistory, false)).unwrap();
        assert!(rec.contains_key("2026/02/04"));
    }

    #[test]
    fn test_not_expected_date() {
        let rows = vec![row("115/02/04", "10", "1", "1", "12")];
        let err = institutional_rows_to_record(&rows, &request(Category::Institutional, true)).unwrap_err();
        match err {
            ExtractError::NotExpectedDate { expected, found } => {
                assert_eq!(expected, "115/02/05");
                assert_eq!(found, "115/02/04");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_data_zero_needs_two_zero_groups() {
        let req = request(Category::Institutional, true);

        let one_zero = vec![row("115/02/05", "10", "0", "4", "14")];
        assert!(institutional_rows_to_record(&one_zero, &req).is_ok());

        let two_zero = vec![row("115/02/05", "10", "0", "0", "10")];
        let err = institutional_rows_to_record(&two_zero, &req).unwrap_err();
        assert!(matches!(err, ExtractError::DataZero { .. }));
    }

    #[test]
    fn test_empty_rows_not_found() {
        let err = institutional_rows_to_record(&[], &request(Category::Institutional, true)).unwrap_err();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }

    #[test]
    fn test_sma_reading() {
        let reading = SmaReading {
            date: Some("2026/02/05".into()),
            values: vec![("SMA5".into(), "612.40".into())],
            iframe_src: None,
        };
        let rec = sma_reading_to_record(&reading, &request(Category::Sma, true)).unwrap();
        assert_eq!(rec["2026/02/05"]["SMA5"], "612.40");

        let stale = SmaReading { date: Some("2026/02/04".into()), ..reading.clone() };
        assert!(matches!(
            sma_reading_to_record(&stale, &request(Category::Sma, true)),
            Err(ExtractError::NotExpectedDate { .. })
        ));

        let blank = SmaReading { values: vec![], ..reading };
        assert!(matches!(
            sma_reading_to_record(&blank, &request(Category::Sma, true)),
            Err(ExtractError::NotFound(_))
        ));
    }
}
