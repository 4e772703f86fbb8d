use anyhow::{ensure, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Scraper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Daily snapshot files and failure lists
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// One file per stock for the institutional history
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    /// Stock list: code,name[,...] with a header row
    #[serde(default = "default_reference_csv")]
    pub reference_csv: PathBuf,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_retry_concurrency")]
    pub retry_concurrency: usize,

    #[serde(default = "default_delay_min_ms")]
    pub delay_min_ms: u64,

    #[serde(default = "default_delay_max_ms")]
    pub delay_max_ms: u64,

    #[serde(default = "default_retry_delay_min_ms")]
    pub retry_delay_min_ms: u64,

    #[serde(default = "default_retry_delay_max_ms")]
    pub retry_delay_max_ms: u64,

    /// Worker i waits i * stagger_ms before its first request
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,

    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,

    /// Before this local hour, yesterday is the target date
    #[serde(default = "default_cutoff_hour")]
    pub cutoff_hour: u32,

    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Window start for stocks without any history yet
    #[serde(default = "default_history_start")]
    pub history_start: NaiveDate,

    /// How many stocks to ask for the market date before falling back to the clock
    #[serde(default = "default_market_date_items")]
    pub market_date_items: usize,

    /// Daily snapshot files are rewritten after this many saved stocks, and
    /// once more when the pass ends
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://fubon-ebrokerdj.fbs.com.tw".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0 Safari/537.36"
        .to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data_fubon")
}
fn default_history_dir() -> PathBuf {
    PathBuf::from("data_institutional")
}
fn default_reference_csv() -> PathBuf {
    PathBuf::from("data_twse/twse_industry.csv")
}
fn default_concurrency() -> usize {
    5
}
fn default_retry_concurrency() -> usize {
    3
}
fn default_delay_min_ms() -> u64 {
    300
}
fn default_delay_max_ms() -> u64 {
    600
}
fn default_retry_delay_min_ms() -> u64 {
    500
}
fn default_retry_delay_max_ms() -> u64 {
    1000
}
fn default_stagger_ms() -> u64 {
    500
}
fn default_page_timeout_secs() -> u64 {
    90
}
fn default_cutoff_hour() -> u32 {
    14
}
fn default_utc_offset_hours() -> i32 {
    8
}
fn default_history_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 2).unwrap_or_default()
}
fn default_market_date_items() -> usize {
    3
}
fn default_flush_every() -> usize {
    20
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            history_dir: default_history_dir(),
            reference_csv: default_reference_csv(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry_concurrency: default_retry_concurrency(),
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
            retry_delay_min_ms: default_retry_delay_min_ms(),
            retry_delay_max_ms: default_retry_delay_max_ms(),
            stagger_ms: default_stagger_ms(),
            page_timeout_secs: default_page_timeout_secs(),
            cutoff_hour: default_cutoff_hour(),
            utc_offset_hours: default_utc_offset_hours(),
            history_start: default_history_start(),
            market_date_items: default_market_date_items(),
            flush_every: default_flush_every(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("FUBON").separator("__"))
            .build()
            .context("Failed to read configuration")?;

        Self::from_config(cfg)
    }

    /// Deserialize and validate. Any bad key is an error; nothing falls back
    /// to defaults silently.
    pub fn from_config(cfg: config::Config) -> Result<Self> {
        let app_cfg: AppConfig = cfg.try_deserialize().context("Invalid configuration")?;
        app_cfg.validate()?;
        Ok(app_cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        ensure!(p.concurrency >= 1, "pipeline.concurrency must be at least 1");
        ensure!(p.retry_concurrency >= 1, "pipeline.retry_concurrency must be at least 1");
        ensure!(
            p.concurrency == 1 || p.retry_concurrency < p.concurrency,
            "pipeline.retry_concurrency must be lower than pipeline.concurrency"
        );
        ensure!(p.flush_every >= 1, "pipeline.flush_every must be at least 1");
        ensure!(p.delay_min_ms <= p.delay_max_ms, "pipeline.delay_min_ms exceeds delay_max_ms");
        ensure!(
            p.retry_delay_min_ms <= p.retry_delay_max_ms,
            "pipeline.retry_delay_min_ms exceeds retry_delay_max_ms"
        );
        ensure!(p.cutoff_hour <= 24, "pipeline.cutoff_hour must be within 0..=24");
        ensure!(
            (-12..=14).contains(&p.utc_offset_hours),
            "pipeline.utc_offset_hours out of range"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.pipeline.concurrency, 5);
        assert!(cfg.pipeline.retry_concurrency < cfg.pipeline.concurrency);
        assert_eq!(cfg.pipeline.history_start, NaiveDate::from_ymd_opt(2025, 11, 2).unwrap());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[pipeline]\nconcurrency = 2\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.pipeline.concurrency, 2);
        assert_eq!(cfg.pipeline.cutoff_hour, 14);
        assert_eq!(cfg.storage.data_dir, PathBuf::from("data_fubon"));
    }

    #[test]
    fn test_bad_value_is_an_error_not_defaults() {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(
                "[storage]\ndata_dir = \"/srv/elsewhere\"\n[pipeline]\nconcurrency = \"many\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let err = AppConfig::from_config(cfg).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid configuration"));
    }

    #[test]
    fn test_from_config_validates() {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(
                "[pipeline]\nconcurrency = 0\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        assert!(AppConfig::from_config(cfg).is_err());
    }

    #[test]
    fn test_retry_must_run_narrower_than_main_pass() {
        let mut cfg = AppConfig::default();
        cfg.pipeline.retry_concurrency = cfg.pipeline.concurrency;
        assert!(cfg.validate().is_err());

        cfg.pipeline.concurrency = 1;
        cfg.pipeline.retry_concurrency = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_inverted_delay_range_rejected() {
        let mut cfg = AppConfig::default();
        cfg.pipeline.delay_min_ms = 900;
        assert!(cfg.validate().is_err());
    }
}
