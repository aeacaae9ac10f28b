use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use docmatch::config::{load_config, Config};
use docmatch::core::batch::{BatchComparator, BatchResult, CancelHandle, ComparisonResult};
use docmatch::core::fetch::CandidateRef;
use docmatch::core::hash::PerceptualHasher;
use docmatch::core::image::open_image;
use docmatch::core::ocr::build_extractor;
use docmatch::core::scanner::discover_candidates;
use docmatch::server::run_server;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "docmatch",
    version,
    about = "Find which reference images best match a photo"
)]
struct Cli {
    /// Config file (default: <config dir>/docmatch/docmatch.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare a query image against candidate images
    Compare {
        /// Query image
        #[arg(short, long, value_name = "IMG")]
        query: PathBuf,

        /// Candidate paths or http(s) URLs
        #[arg(value_name = "CANDIDATE")]
        candidates: Vec<String>,

        /// Add every image under this directory as a candidate
        #[arg(short, long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,

        /// Only show the N best matches
        #[arg(long, value_name = "N")]
        top: Option<usize>,
    },

    /// Serve the comparison API over HTTP
    Serve {
        /// Address to listen on, overrides [server].bind
        #[arg(short, long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Print the perceptual fingerprint of an image
    Hash {
        #[arg(value_name = "IMG")]
        path: PathBuf,
    },
}

#[derive(Serialize)]
struct Report<'a> {
    compared_at: String,
    query: String,
    extractor: &'a str,
    ranking: Vec<usize>,
    #[serde(flatten)]
    batch: &'a BatchResult,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Compare {
            query,
            candidates,
            dir,
            json,
            top,
        } => compare(&config, &query, candidates, dir.as_deref(), json, top).await,

        Commands::Serve { bind } => {
            let mut server_config = config.server.clone();
            if let Some(bind) = bind {
                server_config.bind = bind;
            }
            let comparator = Arc::new(build_comparator(&config)?);
            run_server(comparator, &server_config).await
        }

        Commands::Hash { path } => {
            let hasher =
                PerceptualHasher::new(&config.hash).context("Failed to configure hasher")?;
            let image = open_image(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let fingerprint = hasher.hash(&image);
            println!(
                "{}  {} bits  {}",
                fingerprint.to_base64(),
                fingerprint.bit_len(),
                path.display()
            );
            Ok(())
        }
    }
}

fn build_comparator(config: &Config) -> Result<BatchComparator> {
    let extractor = build_extractor(&config.ocr).context("Failed to start text extractor")?;
    log::info!("Text extractor: {}", extractor.name());
    BatchComparator::from_config(config, extractor)
}

async fn compare(
    config: &Config,
    query_path: &Path,
    locators: Vec<String>,
    dir: Option<&Path>,
    json: bool,
    top: Option<usize>,
) -> Result<()> {
    let mut candidates: Vec<CandidateRef> = locators.iter().map(|s| CandidateRef::parse(s)).collect();
    if let Some(dir) = dir {
        candidates.extend(discover_candidates(dir)?);
    }
    if candidates.is_empty() {
        anyhow::bail!("No candidates given; pass paths, URLs or --dir");
    }

    let comparator = build_comparator(config)?;

    let owned_path = query_path.to_path_buf();
    let query = tokio::task::spawn_blocking(move || open_image(&owned_path))
        .await?
        .with_context(|| format!("Failed to open query image {}", query_path.display()))?;

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling remaining comparisons");
            on_interrupt.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("Comparing against {} candidates…", candidates.len()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let start = Instant::now();
    let batch = comparator
        .compare_all(Arc::new(query), &candidates, &cancel)
        .await?;
    spinner.finish_and_clear();
    log::debug!("Batch of {} took {:.2?}", batch.len(), start.elapsed());

    let limit = top.unwrap_or(batch.len());
    let ranked: Vec<&ComparisonResult> = batch.ranked().into_iter().take(limit).collect();

    if json {
        let report = Report {
            compared_at: Utc::now().to_rfc3339(),
            query: query_path.display().to_string(),
            extractor: comparator.scorer().extractor_name(),
            ranking: ranked.iter().map(|r| r.index).collect(),
            batch: &batch,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("▶ {} vs {} candidate(s)", query_path.display(), batch.len());
    for (rank, result) in ranked.iter().enumerate() {
        println!("{:>3}. {}", rank + 1, format_row(result));
    }
    match batch.best() {
        Some(best) => println!("\n🏆 Best match → {}", best.candidate),
        None => println!("\nNo candidate could be scored."),
    }
    Ok(())
}

fn format_row(result: &ComparisonResult) -> String {
    fn pct(value: Option<f64>) -> String {
        value.map_or_else(|| "    -".to_string(), |v| format!("{:>5.1}", v * 100.0))
    }

    if let Some(failure) = result.failure() {
        return format!(
            "⚠️  {}  [{}] {}",
            result.candidate, failure.code, failure.message
        );
    }
    match result.scores() {
        Some(scores) => format!(
            "{}%  visual {}%  text {}%  {}",
            pct(scores.combined),
            pct(scores.visual_similarity),
            pct(scores.text_similarity),
            result.candidate
        ),
        None => result.candidate.clone(),
    }
}
