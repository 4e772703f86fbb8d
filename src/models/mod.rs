use crate::calendar::DateConvention;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

// ── Work items ────────────────────────────────────────────────────────────────

/// One crawl target, usually a stock code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub display_name: String,
    pub last_known_date: Option<String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            last_known_date: None,
        }
    }
}

// ── Dated records ─────────────────────────────────────────────────────────────

/// Named fields for one date, e.g. `{"SMA5": "612.40"}`.
pub type Payload = Map<String, Value>;

/// Date key → payload. Keys are zero-padded so map order is chronological.
pub type DatedRecord = BTreeMap<String, Payload>;

/// Persisted snapshot for one work item within one category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemState {
    pub display_name: String,
    pub dated: DatedRecord,
}

// ── Failures ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    NotExpectedDate,
    DataZero,
    NotFound,
    Timeout,
    ParseError,
    #[default]
    Other,
}

/// One failed item, in the on-disk failure-list shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(rename = "stock")]
    pub item_id: String,
    #[serde(default)]
    pub reason: FailureReason,
    #[serde(rename = "error", default)]
    pub message: String,
}

impl FailureRecord {
    pub fn new(item_id: impl Into<String>, reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            reason,
            message: message.into(),
        }
    }
}

// ── Categories ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Category {
    /// Moving averages (SMA5..SMA240), one daily snapshot file
    Sma,
    /// Institutional net buy/sell, one daily snapshot file
    Institutional,
    /// Institutional net buy/sell, one history file per stock
    InstitutionalHistory,
}

/// How dated data is nested inside an item object on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `{"<date>": {field: value}}`
    DateMajor,
    /// `{field: {"<date>": value}}` for the listed fields
    FieldMajor(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// When an item counts as already fetched for the target date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    /// Latest stored date equals the target, optionally with a non-empty payload.
    LatestDate { require_payload: bool },
    /// Some stored date carries this field.
    FieldPresent { field: &'static str },
}

pub const INSTITUTIONAL_FIELDS: &[&str] = &["ForeignInvestors", "InvestmentTrust", "Dealers", "DailyTotal"];

/// Everything the core needs to know about a category.
#[derive(Debug, Clone)]
pub struct CategoryProfile {
    pub slug: &'static str,
    pub convention: DateConvention,
    pub layout: Layout,
    pub order: SortOrder,
    pub completeness: Completeness,
    /// Reject pages whose freshest row is not the requested end date.
    pub strict_freshness: bool,
    /// Write `StockName` next to the dated values.
    pub stores_name: bool,
}

impl Category {
    pub fn profile(self) -> CategoryProfile {
        match self {
            Category::Sma => CategoryProfile {
                slug: "sma",
                convention: DateConvention::Gregorian,
                layout: Layout::DateMajor,
                order: SortOrder::Ascending,
                completeness: Completeness::LatestDate { require_payload: true },
                strict_freshness: true,
                stores_name: true,
            },
            Category::Institutional => CategoryProfile {
                slug: "institutional",
                convention: DateConvention::Roc,
                layout: Layout::FieldMajor(INSTITUTIONAL_FIELDS),
                order: SortOrder::Descending,
                completeness: Completeness::FieldPresent { field: "ForeignInvestors" },
                strict_freshness: true,
                stores_name: true,
            },
            Category::InstitutionalHistory => CategoryProfile {
                slug: "institutional_history",
                convention: DateConvention::Gregorian,
                layout: Layout::DateMajor,
                order: SortOrder::Descending,
                completeness: Completeness::LatestDate { require_payload: false },
                strict_freshness: false,
                stores_name: false,
            },
        }
    }
}

// ── Run parameters ────────────────────────────────────────────────────────────

/// Read-only parameters for one crawl or retry pass.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target_date: NaiveDate,
    pub concurrency: usize,
    pub delay_range: RangeInclusive<u64>,
    pub stagger: Duration,
    pub page_timeout: Duration,
    pub date_range_start: Option<NaiveDate>,
    pub date_range_end: Option<NaiveDate>,
    pub force: bool,
}

/// What an extractor is asked to fetch for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub category: Category,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub convention: DateConvention,
    pub strict_freshness: bool,
}

impl FetchRequest {
    /// The end date spelled in the category's key convention.
    pub fn target_key(&self) -> String {
        self.convention.format_key(self.end)
    }
}

// ── Summary ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub skipped: usize,
    pub pending: usize,
    pub success: usize,
    pub failure: usize,
    pub failures: Vec<FailureRecord>,
    pub fatal: Vec<String>,
    /// Set when a failure list was written
    pub failure_list: Option<PathBuf>,
}
