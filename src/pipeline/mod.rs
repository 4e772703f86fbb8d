//! Pipeline orchestrator: reference list → pending filter → worker pool →
//! failure list.
//!
//! ## Run modes
//!
//! `crawl()`: daily mode (cron use).
//!   1. Resolve the target date (explicit, the date the portal shows, or clock with cutoff)
//!   2. Drop items whose stored state is already complete for that date
//!   3. Drain the rest through the worker pool, saving state as items finish
//!      (snapshot files are written every `flush_every` saves and at the end)
//!   4. Persist the failure list (or remove it when nothing failed)
//!
//! `retry()`: re-runs exactly the ids in a failure list, skipping the
//!   completeness check, and replaces the list with the new outcome.
//!
//! `status()`: read-only view of the stored state for a category/date.
//!
//! `consolidate()`: rebuilds daily institutional snapshots from the history
//!   files, for days the daily crawl missed.

pub mod consolidate;
pub mod failures;
pub mod merge;
pub mod pool;
pub mod queue;

use crate::calendar::{compact, is_trading_day, one_month_before, resolve_target_date};
use crate::config::AppConfig;
use crate::error::CrawlError;
use crate::loader::{load_reference_list, shard};
use crate::models::{Category, RunConfig, RunSummary, WorkItem};
use crate::scraper::PageExtractor;
use crate::storage::codec::StateCodec;
use crate::storage::{is_complete, latest_date, write_snapshot, ItemFileStore, ItemStore, SnapshotStore};
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use self::consolidate::{snapshot_item, trading_days};
use self::failures::{failure_list_path, load_failures, persist_failures, unique_ids};
use self::pool::{run_pool, FetchPlan, StartRule};
use self::queue::WorkQueue;

/// Command-line knobs for one crawl.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub category: Category,
    pub date: Option<NaiveDate>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub force: bool,
    pub start_index: usize,
    pub limit: Option<usize>,
}

impl CrawlOptions {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            date: None,
            start: None,
            end: None,
            force: false,
            start_index: 0,
            limit: None,
        }
    }
}

#[derive(Debug)]
pub struct StatusReport {
    pub target: NaiveDate,
    pub location: PathBuf,
    pub items: usize,
    pub complete: usize,
    /// `None` when no failure list exists
    pub failures: Option<usize>,
    pub failure_list: PathBuf,
}

#[derive(Debug, Default)]
pub struct ConsolidateSummary {
    /// Stocks with a history file
    pub histories: usize,
    pub files_written: usize,
    /// Weekdays with no history data at all
    pub days_empty: usize,
}

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// `None` when the target date is not a trading day.
    pub async fn crawl(&self, opts: CrawlOptions, extractor: Arc<dyn PageExtractor>) -> Result<Option<RunSummary>> {
        let items = load_reference_list(&self.config.storage.reference_csv)?;
        let items = shard(items, opts.start_index, opts.limit);

        let target = self.resolve_target(opts.category, opts.date, &items, extractor.as_ref()).await;
        if !is_trading_day(target) {
            info!("{} is not a trading day, nothing to crawl", target);
            return Ok(None);
        }

        let run = self.main_run(target, &opts);
        let plan = self.plan_for(opts.category, run.target_date, run.date_range_start, run.date_range_end);
        let store = self.open_store(opts.category, target).await;

        // ── Pending filter ────────────────────────────────────────────────────
        let target_key = plan.target_key();
        let total = items.len();
        let mut pending = Vec::new();
        for mut item in items {
            let state = store.load(&item.id).await;
            if !run.force && is_complete(&state, &target_key, &plan.profile.completeness) {
                debug!("{}: complete for {}", item.id, target_key);
                continue;
            }
            item.last_known_date = latest_date(&state).map(str::to_string);
            pending.push(item);
        }
        info!(
            "=== {:?} {}: {} stocks, {} complete, {} pending ===",
            opts.category,
            target,
            total,
            total - pending.len(),
            pending.len()
        );

        self.run_pass(opts.category, target, pending, total, run, store, extractor, Arc::new(plan))
            .await
            .map(Some)
    }

    /// Re-run the failure list of `category`/`date`. `None` when there was
    /// nothing to retry.
    pub async fn retry(
        &self,
        category: Category,
        date: Option<NaiveDate>,
        extractor: Arc<dyn PageExtractor>,
    ) -> Result<Option<RunSummary>> {
        let target = date.unwrap_or_else(|| self.clock_target());
        let path = failure_list_path(&self.config.storage.data_dir, category.profile().slug, target);

        let Some(list) = load_failures(&path).await? else {
            info!("No failure list at {:?}, nothing to retry", path);
            return Ok(None);
        };
        if list.is_empty() {
            persist_failures(&[], &path).await?;
            return Ok(None);
        }

        let names: HashMap<String, String> = match load_reference_list(&self.config.storage.reference_csv) {
            Ok(items) => items.into_iter().map(|i| (i.id, i.display_name)).collect(),
            Err(e) => {
                debug!("Retrying without display names: {}", e);
                HashMap::new()
            }
        };
        let items: Vec<WorkItem> = unique_ids(&list)
            .into_iter()
            .map(|id| {
                let name = names.get(&id).cloned().unwrap_or_default();
                WorkItem::new(id, name)
            })
            .collect();
        info!("=== Retrying {} failed stocks for {:?} {} ===", items.len(), category, target);

        let run = self.retry_run(target);
        let plan = self.plan_for(category, run.target_date, run.date_range_start, run.date_range_end);
        let store = self.open_store(category, target).await;
        let total = items.len();

        self.run_pass(category, target, items, total, run, store, extractor, Arc::new(plan))
            .await
            .map(Some)
    }

    pub async fn status(&self, category: Category, date: Option<NaiveDate>) -> Result<StatusReport> {
        let target = date.unwrap_or_else(|| self.clock_target());
        let items = load_reference_list(&self.config.storage.reference_csv)?;
        let plan = self.plan_for(category, target, None, None);
        let store = self.open_store(category, target).await;
        let target_key = plan.target_key();

        let mut complete = 0;
        for item in &items {
            if is_complete(&store.load(&item.id).await, &target_key, &plan.profile.completeness) {
                complete += 1;
            }
        }

        let failure_list = failure_list_path(&self.config.storage.data_dir, plan.profile.slug, target);
        let failures = load_failures(&failure_list).await?.map(|l| l.len());

        Ok(StatusReport {
            target,
            location: self.state_location(category, target),
            items: items.len(),
            complete,
            failures,
            failure_list,
        })
    }

    /// Write `fubon_<date>_institutional.json` for every weekday in
    /// `start..=end` from the stored history, overwriting existing files.
    pub async fn consolidate(&self, start: NaiveDate, end: NaiveDate) -> Result<ConsolidateSummary> {
        let items = load_reference_list(&self.config.storage.reference_csv)?;
        let history = self.open_store(Category::InstitutionalHistory, end).await;

        let mut loaded = Vec::new();
        for item in items {
            let state = history.load(&item.id).await;
            if !state.dated.is_empty() {
                loaded.push((item, state));
            }
        }
        info!("=== Consolidating {} histories, {} to {} ===", loaded.len(), start, end);

        let codec = StateCodec::for_profile(&Category::Institutional.profile());
        let mut summary = ConsolidateSummary {
            histories: loaded.len(),
            ..Default::default()
        };
        for date in trading_days(start, end) {
            let snapshot: BTreeMap<String, _> = loaded
                .iter()
                .filter_map(|(item, state)| Some((item.id.clone(), snapshot_item(&item.display_name, state, date)?)))
                .collect();
            if snapshot.is_empty() {
                debug!("{}: no history data", date);
                summary.days_empty += 1;
                continue;
            }
            let path = self.state_location(Category::Institutional, date);
            write_snapshot(&path, &codec, &snapshot).await?;
            debug!("{}: {} stocks -> {:?}", date, snapshot.len(), path);
            summary.files_written += 1;
        }

        info!(
            "=== Done: {} files written | {} days without data ===",
            summary.files_written, summary.days_empty
        );
        Ok(summary)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Where item state lives: the daily snapshot file, or the history directory.
    pub fn state_location(&self, category: Category, date: NaiveDate) -> PathBuf {
        let storage = &self.config.storage;
        match category {
            Category::InstitutionalHistory => storage.history_dir.clone(),
            _ => storage
                .data_dir
                .join(format!("fubon_{}_{}.json", compact(date), category.profile().slug)),
        }
    }

    async fn open_store(&self, category: Category, date: NaiveDate) -> Arc<dyn ItemStore> {
        let codec = StateCodec::for_profile(&category.profile());
        let location = self.state_location(category, date);
        match category {
            Category::InstitutionalHistory => Arc::new(ItemFileStore::new(location, codec)),
            _ => Arc::new(
                SnapshotStore::open(location, codec)
                    .await
                    .with_flush_every(self.config.pipeline.flush_every),
            ),
        }
    }

    fn clock_target(&self) -> NaiveDate {
        let p = &self.config.pipeline;
        resolve_target_date(Utc::now(), p.utc_offset_hours, p.cutoff_hour)
    }

    /// Explicit date wins. For SMA the portal itself is asked which day it is
    /// showing; otherwise the clock decides.
    async fn resolve_target(
        &self,
        category: Category,
        explicit: Option<NaiveDate>,
        items: &[WorkItem],
        extractor: &dyn PageExtractor,
    ) -> NaiveDate {
        if let Some(date) = explicit {
            return date;
        }
        if category == Category::Sma {
            for item in items.iter().take(self.config.pipeline.market_date_items) {
                if let Some(date) = extractor.read_market_date(item).await {
                    info!("Portal shows market date {} (via {})", date, item.id);
                    return date;
                }
            }
            warn!("Could not read the market date from the portal, using the clock");
        }
        self.clock_target()
    }

    fn plan_for(
        &self,
        category: Category,
        target: NaiveDate,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> FetchPlan {
        match category {
            Category::Sma => FetchPlan::new(category, StartRule::SameDay, target),
            Category::Institutional => FetchPlan::new(
                category,
                StartRule::Fixed(start.unwrap_or_else(|| one_month_before(target))),
                end.unwrap_or(target),
            ),
            Category::InstitutionalHistory => match (start, end) {
                (Some(s), Some(e)) => FetchPlan::new(category, StartRule::Fixed(s), e),
                _ => FetchPlan::new(
                    category,
                    StartRule::Resume {
                        fallback: self.config.pipeline.history_start,
                    },
                    target,
                ),
            },
        }
    }

    fn main_run(&self, target: NaiveDate, opts: &CrawlOptions) -> RunConfig {
        let p = &self.config.pipeline;
        RunConfig {
            target_date: target,
            concurrency: p.concurrency,
            delay_range: p.delay_min_ms..=p.delay_max_ms,
            stagger: Duration::from_millis(p.stagger_ms),
            page_timeout: Duration::from_secs(p.page_timeout_secs),
            date_range_start: opts.start,
            date_range_end: opts.end,
            force: opts.force,
        }
    }

    /// Narrower and slower than the main pass; always refetches.
    fn retry_run(&self, target: NaiveDate) -> RunConfig {
        let p = &self.config.pipeline;
        RunConfig {
            target_date: target,
            concurrency: p.retry_concurrency.min(p.concurrency).max(1),
            delay_range: p.retry_delay_min_ms..=p.retry_delay_max_ms,
            stagger: Duration::from_millis(p.stagger_ms),
            page_timeout: Duration::from_secs(p.page_timeout_secs),
            date_range_start: None,
            date_range_end: None,
            force: true,
        }
    }

    /// Pool + failure list + summary, shared by crawl and retry.
    #[allow(clippy::too_many_arguments)]
    async fn run_pass(
        &self,
        category: Category,
        target: NaiveDate,
        pending: Vec<WorkItem>,
        total: usize,
        run: RunConfig,
        store: Arc<dyn ItemStore>,
        extractor: Arc<dyn PageExtractor>,
        plan: Arc<FetchPlan>,
    ) -> Result<RunSummary> {
        let pending_count = pending.len();
        let queue = Arc::new(WorkQueue::new(pending));
        let mut report = run_pool(queue, &run, store.clone(), extractor, plan).await;
        if let Err(e) = store.flush().await {
            error!("Final state write failed: {:#}", e);
            report.fatal.push(format!("{:#}", e));
        }

        let path = failure_list_path(&self.config.storage.data_dir, category.profile().slug, target);
        persist_failures(&report.failures, &path).await?;

        let summary = RunSummary {
            total,
            skipped: total - pending_count,
            pending: pending_count,
            success: report.success,
            failure: report.failures.len(),
            failure_list: (!report.failures.is_empty()).then(|| path.clone()),
            failures: report.failures,
            fatal: report.fatal,
        };
        info!(
            "=== Done: {} ok | {} failed | {} skipped | {} total ===",
            summary.success, summary.failure, summary.skipped, summary.total
        );

        if let Some(first) = summary.fatal.first() {
            error!("{} worker(s) aborted; state merged so far is on disk", summary.fatal.len());
            return Err(CrawlError::PoolFatal {
                count: summary.fatal.len(),
                first: first.clone(),
            }
            .into());
        }
        Ok(summary)
    }
}
