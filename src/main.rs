mod atomic;
mod config;
mod discovery;
mod error;
mod extract;
mod fetch;
mod pipeline;
mod progress;
mod record;
mod sink;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};

use crate::config::{RetryPolicy, Settings, WriteMode};
use crate::discovery::Pagination;
use crate::extract::IgefaExtractor;
use crate::fetch::HttpFetcher;
use crate::pipeline::{Pipeline, RunSummary};
use crate::progress::ProgressStore;
use crate::sink::RecordSink;

#[derive(Parser)]
#[command(name = "igefa_scraper", about = "Resumable product scraper for store.igefa.de")]
struct Cli {
    /// Settings file (default: ./igefa_scraper.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding progress, output and buffer files
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,
    /// Hide the progress bar
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScrapeOpts {
    /// Max concurrent product fetches per batch
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,
    /// Write rows immediately or collect them in a buffer first
    #[arg(long, value_enum)]
    write_mode: Option<WriteMode>,
    /// Which failures are recorded as processed
    #[arg(long, value_enum)]
    retry_policy: Option<RetryPolicy>,
}

#[derive(Args)]
struct PageOpts {
    /// Listing page ceiling
    #[arg(short = 'n', long)]
    max_pages: Option<u32>,
    /// Stop after this many empty listing pages in a row
    #[arg(long)]
    max_empty_pages: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover products from listing pages and scrape them, page by page
    Run {
        #[command(flatten)]
        pages: PageOpts,
        #[command(flatten)]
        scrape: ScrapeOpts,
    },
    /// Scrape a fixed list of product URLs as one batch
    Urls {
        /// Product URLs
        urls: Vec<String>,
        /// File with one URL per line (# starts a comment)
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        scrape: ScrapeOpts,
    },
    /// Print discovered product URLs without scraping
    Discover {
        #[command(flatten)]
        pages: PageOpts,
    },
    /// Write a buffer left by an interrupted run into the CSV
    Flush,
    /// Show progress and output statistics
    Stats,
}

impl ScrapeOpts {
    fn apply(&self, settings: &mut Settings) {
        if let Some(c) = self.concurrency {
            settings.concurrency = c;
        }
        if let Some(m) = self.write_mode {
            settings.write_mode = m;
        }
        if let Some(p) = self.retry_policy {
            settings.retry_policy = p;
        }
    }
}

impl PageOpts {
    fn apply(&self, settings: &mut Settings) {
        if let Some(n) = self.max_pages {
            settings.max_pages = n;
        }
        if let Some(n) = self.max_empty_pages {
            settings.max_empty_pages = n;
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.output_dir {
        settings.output_dir = dir;
    }

    match cli.command {
        Commands::Run { pages, scrape } => {
            pages.apply(&mut settings);
            scrape.apply(&mut settings);
            settings.validate()?;
            let summary = scrape_products(settings, None, cli.quiet).await?;
            report(&summary);
            Ok(())
        }
        Commands::Urls { urls, file, scrape } => {
            scrape.apply(&mut settings);
            settings.validate()?;
            let mut seed = urls;
            if let Some(path) = file {
                seed.extend(read_url_file(&path)?);
            }
            if seed.is_empty() {
                println!("No URLs given. Pass them as arguments or with --file.");
                return Ok(());
            }
            let summary = scrape_products(settings, Some(seed), cli.quiet).await?;
            report(&summary);
            Ok(())
        }
        Commands::Discover { pages } => {
            pages.apply(&mut settings);
            let fetcher = HttpFetcher::new(&settings)?;
            let mut walker = Pagination::new(settings.max_pages, settings.max_empty_pages);
            let mut total = 0;
            while let Some(page) = walker.next_page() {
                let urls = discovery::list_page(&fetcher, &settings, page)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Listing page {} failed: {}", page, e);
                        Vec::new()
                    });
                walker.observe(urls.len());
                total += urls.len();
                for url in urls {
                    println!("{}", url);
                }
            }
            info!("Discovered {} product URLs", total);
            Ok(())
        }
        Commands::Flush => {
            let report = sink::flush_buffer(&settings)?;
            println!(
                "Flushed buffer: {} rows written, {} already present.",
                report.written, report.skipped
            );
            Ok(())
        }
        Commands::Stats => {
            let progress = ProgressStore::load(settings.progress_path())?;
            let rows = sink::count_rows(&settings.output_path())?;
            let buffered = sink::BufferedSink::open(settings.buffer_path(), settings.output_path())?;
            if progress.is_empty() {
                println!("Nothing processed yet in {}", settings.output_dir.display());
                return Ok(());
            }
            println!("Processed: {}", progress.len());
            println!("CSV rows:  {}", rows);
            println!("Buffered:  {}", buffered.pending());
            println!("Output:    {}", settings.output_dir.display());
            Ok(())
        }
    }
}

async fn scrape_products(
    settings: Settings,
    seed: Option<Vec<String>>,
    quiet: bool,
) -> Result<RunSummary> {
    let progress =
        ProgressStore::load(settings.progress_path()).context("Cannot load progress file")?;
    let output = sink::open(&settings).context("Cannot open output")?;
    let fetcher = HttpFetcher::new(&settings)?;
    let extractor = IgefaExtractor::new(&settings.supplier);

    let mut pipeline = Pipeline::new(fetcher, extractor, progress, output, settings)
        .with_stop_flag(interrupt_flag())
        .with_progress_bar(progress_bar(quiet)?);

    let summary = match seed {
        Some(urls) => pipeline.run_static(urls).await?,
        None => pipeline.run_paginated().await?,
    };
    info!(
        "{} now lists {} processed URLs",
        pipeline.progress().path().display(),
        pipeline.progress().len()
    );
    Ok(summary)
}

/// First Ctrl-C asks the pipeline to stop after the current batch; a second
/// one exits immediately.
fn interrupt_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, finishing the current batch (Ctrl-C again to abort)");
        flag.store(true, Ordering::SeqCst);
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Aborting");
            std::process::exit(130);
        }
    });
    stop
}

fn progress_bar(quiet: bool) -> Result<ProgressBar> {
    if quiet || !std::io::stderr().is_terminal() {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );
    Ok(pb)
}

fn report(summary: &RunSummary) {
    println!(
        "Done: {} scraped ({} ok, {} errors), {} already processed.",
        summary.succeeded + summary.failed,
        summary.succeeded,
        summary.failed,
        summary.skipped
    );
    if summary.flushed.written + summary.flushed.skipped > 0 {
        println!("Buffer flushed: {} rows written.", summary.flushed.written);
    }
    if summary.interrupted {
        println!("Interrupted: the last batch was completed and saved. Run again to continue.");
    }
}

fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(
            &path,
            "# seed list\nhttps://store.igefa.de/p/a/1\n\n  https://store.igefa.de/p/b/2  \n",
        )
        .unwrap();
        assert_eq!(
            read_url_file(&path).unwrap(),
            vec!["https://store.igefa.de/p/a/1", "https://store.igefa.de/p/b/2"]
        );
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::try_parse_from([
            "igefa_scraper",
            "run",
            "-n",
            "5",
            "-c",
            "2",
            "--write-mode",
            "buffered",
            "--retry-policy",
            "success_only",
        ])
        .unwrap();
        let mut settings = Settings::default();
        match cli.command {
            Commands::Run { pages, scrape } => {
                pages.apply(&mut settings);
                scrape.apply(&mut settings);
            }
            _ => panic!("expected run"),
        }
        assert_eq!(settings.max_pages, 5);
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.write_mode, WriteMode::Buffered);
        assert_eq!(settings.retry_policy, RetryPolicy::SuccessOnly);
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(std::time::Duration::from_secs(75)), "1m 15s");
        assert_eq!(format_duration(std::time::Duration::from_secs(3725)), "1h 2m 5s");
    }
}
