pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::calendar::{to_param_date, DateConvention};
use crate::config::ScraperConfig;
use crate::error::ExtractError;
use crate::models::{Category, DatedRecord, FetchRequest, WorkItem};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;
use url::Url;

use self::cleaner::{institutional_rows_to_record, sma_reading_to_record};
use self::http_client::HttpClient;
use self::parsers::{parse_institutional_page, parse_sma_page, DAILY_ROW_LIMIT};

// ── Extractor traits ──────────────────────────────────────────────────────────

/// Swappable page source. Each worker opens its own session so that page
/// state (cookies, connections) never leaks between workers.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn ExtractSession>, ExtractError>;

    /// Date the portal is currently showing, if the source can tell.
    async fn read_market_date(&self, _item: &WorkItem) -> Option<NaiveDate> {
        None
    }
}

#[async_trait]
pub trait ExtractSession: Send {
    /// Fetch one item. `Err` carries the classified reason.
    async fn extract(&mut self, item: &WorkItem, request: &FetchRequest) -> Result<DatedRecord, ExtractError>;
}

// ── Fubon e-broker ────────────────────────────────────────────────────────────

pub struct FubonExtractor {
    config: ScraperConfig,
    base: Url,
}

impl FubonExtractor {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid scraper.base_url {:?}", config.base_url))?;
        Ok(Self {
            config: config.clone(),
            base,
        })
    }
}

#[async_trait]
impl PageExtractor for FubonExtractor {
    async fn open_session(&self) -> Result<Box<dyn ExtractSession>, ExtractError> {
        let client = HttpClient::new(&self.config).map_err(|e| ExtractError::Fatal(e.to_string()))?;
        Ok(Box::new(FubonSession {
            client,
            base: self.base.clone(),
        }))
    }

    async fn read_market_date(&self, item: &WorkItem) -> Option<NaiveDate> {
        let client = HttpClient::new(&self.config).ok()?;
        let url = sma_url(&self.base, &item.id).ok()?;
        let html = client.get_text(&url).await.ok()?;
        let date = parse_sma_page(&html).ok()?.date?;
        DateConvention::Gregorian.parse_key(&date)
    }
}

pub struct FubonSession {
    client: HttpClient,
    base: Url,
}

/// `…/z/zc/zcw/zcw1_<code>.djhtm`
pub fn sma_url(base: &Url, code: &str) -> Result<Url, ExtractError> {
    base.join(&format!("/z/zc/zcw/zcw1_{}.djhtm", code))
        .map_err(|e| ExtractError::Other(format!("bad SMA url for {}: {}", code, e)))
}

/// `…/z/zc/zcl/zcl.djhtm?a=<code>&c=<start>&d=<end>`
pub fn institutional_url(base: &Url, code: &str, start: NaiveDate, end: NaiveDate) -> Result<Url, ExtractError> {
    let mut url = base
        .join("/z/zc/zcl/zcl.djhtm")
        .map_err(|e| ExtractError::Other(format!("bad institutional url: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("a", code)
        .append_pair("c", &to_param_date(start))
        .append_pair("d", &to_param_date(end));
    Ok(url)
}

impl FubonSession {
    async fn extract_sma(&self, item: &WorkItem, request: &FetchRequest) -> Result<DatedRecord, ExtractError> {
        let url = sma_url(&self.base, &item.id)?;
        let html = self.client.get_text(&url).await?;
        let mut reading = parse_sma_page(&html)?;

        if reading.values.is_empty() {
            if let Some(src) = reading.iframe_src.take() {
                let frame_url = url
                    .join(&src)
                    .map_err(|e| ExtractError::Parse(format!("bad iframe src {:?}: {}", src, e)))?;
                debug!("{}: legend lives in iframe {}", item.id, frame_url);
                let frame = parse_sma_page(&self.client.get_text(&frame_url).await?)?;
                reading.values = frame.values;
                reading.date = reading.date.or(frame.date);
            }
        }

        sma_reading_to_record(&reading, request)
    }

    async fn extract_institutional(
        &self,
        item: &WorkItem,
        request: &FetchRequest,
    ) -> Result<DatedRecord, ExtractError> {
        let url = institutional_url(&self.base, &item.id, request.start, request.end)?;
        let html = self.client.get_text(&url).await?;

        let limit = request.strict_freshness.then_some(DAILY_ROW_LIMIT);
        let rows = parse_institutional_page(&html, limit)?;
        debug!("{}: {} rows from {}", item.id, rows.len(), url);

        institutional_rows_to_record(&rows, request)
    }
}

#[async_trait]
impl ExtractSession for FubonSession {
    async fn extract(&mut self, item: &WorkItem, request: &FetchRequest) -> Result<DatedRecord, ExtractError> {
        match request.category {
            Category::Sma => self.extract_sma(item, request).await,
            Category::Institutional | Category::InstitutionalHistory => {
                self.extract_institutional(item, request).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let base = Url::parse("https://fubon-ebrokerdj.fbs.com.tw").unwrap();
        assert_eq!(
            sma_url(&base, "2330").unwrap().as_str(),
            "https://fubon-ebrokerdj.fbs.com.tw/z/zc/zcw/zcw1_2330.djhtm"
        );

        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 2, 5).unwrap();
        assert_eq!(
            institutional_url(&base, "2330", start, end).unwrap().as_str(),
            "https://fubon-ebrokerdj.fbs.com.tw/z/zc/zcl/zcl.djhtm?a=2330&c=2026-1-5&d=2026-2-5"
        );
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let cfg = ScraperConfig {
            base_url: "not a url".into(),
            ..ScraperConfig::default()
        };
        assert!(FubonExtractor::new(&cfg).is_err());
    }
}
