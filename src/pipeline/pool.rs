//! The worker pool: `concurrency` tokio tasks draining one shared queue.
//!
//! Each worker owns its extractor session and keeps its own tally; tallies are
//! reduced once all workers have joined. The only shared counter is the
//! progress number printed in the ✅/❌ lines.

use crate::error::ExtractError;
use crate::models::{
    Category, CategoryProfile, FailureReason, FailureRecord, FetchRequest, ItemState, RunConfig, WorkItem,
};
use crate::scraper::{ExtractSession, PageExtractor};
use crate::storage::{latest_date, ItemStore};
use chrono::NaiveDate;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::merge::merge;
use super::queue::WorkQueue;

// ── Fetch plan ────────────────────────────────────────────────────────────────

/// Where an item's fetch window starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRule {
    /// Window is the end date only.
    SameDay,
    Fixed(NaiveDate),
    /// From the item's newest stored date (that day is fetched again), or
    /// `fallback` when nothing is stored yet.
    Resume { fallback: NaiveDate },
}

/// Per-category fetch window shared by every worker of one pass.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub category: Category,
    pub profile: CategoryProfile,
    pub start: StartRule,
    pub end: NaiveDate,
}

impl FetchPlan {
    pub fn new(category: Category, start: StartRule, end: NaiveDate) -> Self {
        Self {
            category,
            profile: category.profile(),
            start,
            end,
        }
    }

    pub fn target_key(&self) -> String {
        self.profile.convention.format_key(self.end)
    }

    pub fn request_for(&self, state: &ItemState) -> FetchRequest {
        let start = match self.start {
            StartRule::SameDay => self.end,
            StartRule::Fixed(d) => d,
            StartRule::Resume { fallback } => latest_date(state)
                .and_then(|key| self.profile.convention.parse_key(key))
                .unwrap_or(fallback),
        };

        FetchRequest {
            category: self.category,
            start: start.min(self.end),
            end: self.end,
            convention: self.profile.convention,
            strict_freshness: self.profile.strict_freshness,
        }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct PoolReport {
    pub success: usize,
    pub failures: Vec<FailureRecord>,
    /// One message per worker that stopped early.
    pub fatal: Vec<String>,
}

#[derive(Debug, Default)]
struct WorkerTally {
    success: usize,
    failures: Vec<FailureRecord>,
    fatal: Option<String>,
}

struct PoolContext {
    queue: Arc<WorkQueue>,
    run: RunConfig,
    store: Arc<dyn ItemStore>,
    extractor: Arc<dyn PageExtractor>,
    plan: Arc<FetchPlan>,
    progress: AtomicUsize,
}

// ── Pool ──────────────────────────────────────────────────────────────────────

pub async fn run_pool(
    queue: Arc<WorkQueue>,
    run: &RunConfig,
    store: Arc<dyn ItemStore>,
    extractor: Arc<dyn PageExtractor>,
    plan: Arc<FetchPlan>,
) -> PoolReport {
    let total = queue.total();
    if total == 0 {
        return PoolReport::default();
    }

    let workers = run.concurrency.clamp(1, total);
    info!(
        "Starting {} workers for {} items (target {})",
        workers,
        total,
        plan.target_key()
    );

    let ctx = Arc::new(PoolContext {
        queue: Arc::clone(&queue),
        run: run.clone(),
        store,
        extractor,
        plan,
        progress: AtomicUsize::new(0),
    });

    let handles: Vec<_> = (0..workers)
        .map(|id| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { worker(id, ctx).await })
        })
        .collect();

    let mut report = PoolReport::default();
    for (id, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(tally) => {
                report.success += tally.success;
                report.failures.extend(tally.failures);
                report.fatal.extend(tally.fatal);
            }
            Err(e) => {
                error!("Worker {} panicked: {}", id, e);
                report.fatal.push(format!("worker {} panicked: {}", id, e));
            }
        }
    }

    // Still queued after a worker died: never tried.
    if !report.fatal.is_empty() && !queue.is_empty().await {
        warn!("{} items left unattempted", queue.len().await);
        for item in queue.drain().await {
            report.failures.push(FailureRecord::new(
                item.id,
                FailureReason::Other,
                "not attempted: pool aborted",
            ));
        }
    }

    report
}

async fn worker(id: usize, ctx: Arc<PoolContext>) -> WorkerTally {
    let mut tally = WorkerTally::default();
    sleep(ctx.run.stagger * id as u32).await;

    let mut session = match ctx.extractor.open_session().await {
        Ok(s) => s,
        Err(e) => {
            error!("Worker {} could not open a session: {}", id, e);
            tally.fatal = Some(format!("worker {}: {}", id, e));
            return tally;
        }
    };
    debug!("Worker {} ready", id);

    let total = ctx.queue.total();
    while let Some(item) = ctx.queue.dequeue().await {
        let n = ctx.progress.fetch_add(1, Ordering::Relaxed) + 1;

        match process(&ctx, session.as_mut(), &item).await {
            Ok(dates) => {
                info!("✅ [{}/{}] {} {} ({} dates)", n, total, item.id, item.display_name, dates);
                tally.success += 1;
            }
            Err(e) => {
                warn!("❌ [{}/{}] {}: {}", n, total, item.id, e);
                tally.failures.push(FailureRecord::new(&item.id, e.reason(), e.to_string()));
                if e.is_fatal() {
                    error!("Worker {} stopping: {}", id, e);
                    tally.fatal = Some(format!("worker {} on {}: {}", id, item.id, e));
                    break;
                }
            }
        }

        pause(&ctx.run.delay_range).await;
    }

    tally
}

/// Fetch, merge and save one item. Returns how many dates the page yielded.
async fn process(ctx: &PoolContext, session: &mut dyn ExtractSession, item: &WorkItem) -> Result<usize, ExtractError> {
    let mut state = ctx.store.load(&item.id).await;
    let request = ctx.plan.request_for(&state);
    debug!(
        "{}: stored up to {:?}, window {} → {}",
        item.id, item.last_known_date, request.start, request.end
    );

    let record = match timeout(ctx.run.page_timeout, session.extract(item, &request)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ExtractError::Timeout(format!(
                "no result within {:?}",
                ctx.run.page_timeout
            )));
        }
    };
    if record.is_empty() {
        return Err(ExtractError::NotFound("page yielded no dated values".into()));
    }

    let dates = record.len();
    state.dated = merge(&state.dated, &record);
    if !item.display_name.is_empty() {
        state.display_name = item.display_name.clone();
    }

    ctx.store
        .save(&item.id, &state)
        .await
        .map_err(|e| ExtractError::Fatal(format!("state write failed: {:#}", e)))?;
    Ok(dates)
}

/// Courtesy delay between items.
async fn pause(range: &RangeInclusive<u64>) {
    if range.is_empty() || *range.end() == 0 {
        return;
    }
    let ms = rand::thread_rng().gen_range(range.clone());
    sleep(Duration::from_millis(ms)).await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
