mod calendar;
mod config;
mod error;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::calendar::parse_cli_date;
use crate::config::AppConfig;
use crate::models::{Category, RunSummary};
use crate::pipeline::{CrawlOptions, Pipeline};
use crate::scraper::{FubonExtractor, PageExtractor};
use crate::utils::{fmt_count, preview, Timer};

#[derive(Parser)]
#[command(name = "fubon-crawler", about = "Fubon e-broker daily stock data crawler", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every stock that is not yet complete for the target date
    Crawl {
        #[arg(value_enum)]
        category: Category,

        /// Target date (YYYYMMDD); default follows the portal / clock
        #[arg(long, value_parser = cli_date)]
        date: Option<NaiveDate>,

        /// Window start for institutional pages (YYYY-M-D)
        #[arg(long, value_parser = cli_date)]
        start: Option<NaiveDate>,

        /// Window end for institutional pages (YYYY-M-D)
        #[arg(long, value_parser = cli_date)]
        end: Option<NaiveDate>,

        /// Fetch even if stored data is already complete
        #[arg(long)]
        force: bool,

        /// Offset into the sorted stock list
        #[arg(default_value_t = 0)]
        start_index: usize,

        /// Number of stocks from START_INDEX
        limit: Option<usize>,
    },

    /// Re-run the stocks in the failure list of a category/date
    Retry {
        #[arg(value_enum)]
        category: Category,

        #[arg(long, value_parser = cli_date)]
        date: Option<NaiveDate>,
    },

    /// Show stored progress for a category/date
    Status {
        #[arg(value_enum)]
        category: Category,

        #[arg(long, value_parser = cli_date)]
        date: Option<NaiveDate>,
    },

    /// Rebuild daily institutional files from the per-stock history
    Consolidate {
        #[arg(value_parser = cli_date)]
        start: NaiveDate,

        #[arg(value_parser = cli_date)]
        end: NaiveDate,
    },
}

fn cli_date(s: &str) -> Result<NaiveDate, String> {
    parse_cli_date(s).ok_or_else(|| format!("unrecognized date {:?} (try 20260205 or 2026-2-5)", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "fubon_crawler=info,warn",
        1 => "fubon_crawler=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Crawl {
            category,
            date,
            start,
            end,
            force,
            start_index,
            limit,
        } => {
            let timer = Timer::start(format!("{:?} crawl", category));
            let extractor: Arc<dyn PageExtractor> = Arc::new(FubonExtractor::new(&config.scraper)?);
            let opts = CrawlOptions {
                category,
                date,
                start,
                end,
                force,
                start_index,
                limit,
            };

            if let Some(summary) = Pipeline::new(config).crawl(opts, extractor).await? {
                print_summary("Crawl", &summary, timer.elapsed_secs());
            }
        }

        Command::Retry { category, date } => {
            let timer = Timer::start(format!("{:?} retry", category));
            let extractor: Arc<dyn PageExtractor> = Arc::new(FubonExtractor::new(&config.scraper)?);

            match Pipeline::new(config).retry(category, date, extractor).await? {
                Some(summary) => print_summary("Retry", &summary, timer.elapsed_secs()),
                None => println!("Nothing to retry."),
            }
        }

        Command::Status { category, date } => {
            let report = Pipeline::new(config).status(category, date).await?;
            println!("─────────────────────────────────");
            println!("  {:?} — {}", category, report.target);
            println!("─────────────────────────────────");
            println!("  State    : {}", report.location.display());
            println!("  Stocks   : {}", fmt_count(report.items));
            println!("  Complete : {}", fmt_count(report.complete));
            match report.failures {
                Some(n) => println!("  Failed   : {} ({})", fmt_count(n), report.failure_list.display()),
                None => println!("  Failed   : —"),
            }
            println!("─────────────────────────────────");
        }

        Command::Consolidate { start, end } => {
            let timer = Timer::start("history consolidation");
            let summary = Pipeline::new(config).consolidate(start, end).await?;
            println!("─────────────────────────────────");
            println!("  Consolidate {} → {}", start, end);
            println!("─────────────────────────────────");
            println!("  Histories : {}", fmt_count(summary.histories));
            println!("  Written   : {}", fmt_count(summary.files_written));
            println!("  No data   : {}", fmt_count(summary.days_empty));
            println!("  Elapsed   : {:.1}s", timer.elapsed_secs());
            println!("─────────────────────────────────");
        }
    }

    Ok(())
}

fn print_summary(label: &str, s: &RunSummary, secs: f64) {
    println!("─────────────────────────────────");
    println!("  {} summary ({:.1}s)", label, secs);
    println!("─────────────────────────────────");
    println!("  Success  : {}", fmt_count(s.success));
    println!("  Failure  : {}", fmt_count(s.failure));
    println!("  Skipped  : {}", fmt_count(s.skipped));
    println!("  Total    : {}", fmt_count(s.total));
    if let Some(path) = &s.failure_list {
        println!("  Failures : {}", path.display());
        for f in s.failures.iter().take(10) {
            println!("    {} {:?}: {}", f.item_id, f.reason, preview(&f.message, 80));
        }
        if s.failures.len() > 10 {
            println!("    … and {} more", s.failures.len() - 10);
        }
    }
    println!("─────────────────────────────────");
}
