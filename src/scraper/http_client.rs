use crate::config::ScraperConfig;
use crate::error::ExtractError;
use encoding_rs::{Encoding, BIG5, UTF_8};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(StatusCode),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request error: {0}")]
    Request(String),
}

impl FetchError {
    /// Rate limiting, server hiccups and dropped connections are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status(s) => *s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error(),
            FetchError::Timeout(_) | FetchError::Request(_) => true,
        }
    }
}

impl From<FetchError> for ExtractError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Status(StatusCode::NOT_FOUND | StatusCode::GONE) => {
                ExtractError::NotFound(e.to_string())
            }
            FetchError::Timeout(msg) => ExtractError::Timeout(msg),
            other => ExtractError::Other(other.to_string()),
        }
    }
}

/// One HTTP client per worker session: its own connection pool and cookie jar.
pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text, retrying transient failures with jittered backoff.
    pub async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor((self.config.retry_base_ms / 2).max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries as usize);

        RetryIf::start(strategy, || self.get_once(url), FetchError::is_transient).await
    }

    async fn get_once(&self, url: &Url) -> Result<String, FetchError> {
        debug!("GET {}", url);

        let resp = self.inner.get(url.clone()).send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                warn!("{} answered {}, backing off", url, status);
            }
            return Err(FetchError::Status(status));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await.map_err(classify)?;
        Ok(decode_body(&bytes, content_type.as_deref()))
    }
}

// ── Charset handling ──────────────────────────────────────────────────────────

/// Portal pages are Big5 and often say so only in a `<meta>` tag.
///
/// Label order: `Content-Type` header, then a `charset=` in the first 2 KiB of
/// the body. Without any label, valid UTF-8 stays UTF-8 and anything else is
/// read as Big5.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let labelled = content_type
        .and_then(charset_label)
        .or_else(|| {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(2048)]).to_string();
            charset_label(&head)
        })
        .and_then(|label| Encoding::for_label(label.as_bytes()));

    let encoding = labelled.unwrap_or_else(|| {
        if std::str::from_utf8(bytes).is_ok() { UTF_8 } else { BIG5 }
    });

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!("Body had bytes invalid in {}", encoding.name());
    }
    text.into_owned()
}

/// Value of the first `charset=` in `s`, unquoted.
fn charset_label(s: &str) -> Option<String> {
    let lower = s.to_ascii_lowercase();
    let start = lower.find("charset=")? + "charset=".len();
    let label: String = lower[start..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!label.is_empty()).then_some(label)
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(e.to_string())
    } else {
        FetchError::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(FetchError::Status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(!FetchError::Status(StatusCode::NOT_FOUND).is_transient());
        assert!(FetchError::Timeout("30s".into()).is_transient());
    }

    const BIG5_PAGE: &str = r#"<html><head><meta http-equiv="Content-Type" content="text/html; charset=big5"></head>
        <body><table><tr><td class="t0"><table class="t01">
          <tr><td>日期</td><td>外資</td><td>投信</td><td>自營商</td><td>單日合計</td></tr>
          <tr><td>115/02/05</td><td>1,200</td><td>15</td><td>-3</td><td>1,212</td></tr>
        </table></td></tr></table></body></html>"#;

    #[test]
    fn test_big5_body_with_meta_charset_parses() {
        let (bytes, _, _) = BIG5.encode(BIG5_PAGE);
        assert!(std::str::from_utf8(&bytes).is_err());

        let html = decode_body(&bytes, Some("text/html"));
        assert!(html.contains("外資"));

        let rows = crate::scraper::parsers::parse_institutional_page(&html, None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].foreign, "1,200");
    }

    #[test]
    fn test_unlabelled_big5_and_utf8_bodies() {
        let (bytes, _, _) = BIG5.encode("<p>三大法人</p>");
        assert_eq!(decode_body(&bytes, None), "<p>三大法人</p>");
        assert_eq!(decode_body("<p>三大法人</p>".as_bytes(), None), "<p>三大法人</p>");
    }

    #[test]
    fn test_header_charset_wins() {
        let (bytes, _, _) = BIG5.encode("外資");
        assert_eq!(decode_body(&bytes, Some("text/html; charset=\"Big5\"")), "外資");
        assert_eq!(charset_label("text/html; charset=UTF-8"), Some("utf-8".to_string()));
        assert_eq!(charset_label("text/html"), None);
    }

    #[test]
    fn test_maps_onto_failure_taxonomy() {
        let e: ExtractError = FetchError::Status(StatusCode::NOT_FOUND).into();
        assert!(matches!(e, ExtractError::NotFound(_)));

        let e: ExtractError = FetchError::Timeout("deadline".into()).into();
        assert!(matches!(e, ExtractError::Timeout(_)));

        let e: ExtractError = FetchError::Status(StatusCode::FORBIDDEN).into();
        assert!(matches!(e, ExtractError::Other(_)));
    }
}
