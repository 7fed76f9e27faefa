//! Scheduler: queues scans for a list of repositories that are due.
//!
//! Usage: `cargo run --bin scheduler -- --file repos.txt`
//!        `cargo run --bin scheduler -- https://github.com/acme/widgets`
//!
//! Each input line is `url [priority]`; blank lines and `#` comments are
//! skipped. Requires `DATABASE_URL` (reads .env).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use scanqueue::config::AppConfig;
use scanqueue::models::repository::RepositoryRef;
use scanqueue::services::scan_queue::{self, EnqueueOutcome};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Queue scans for repositories not scanned recently
#[derive(Parser, Debug)]
#[command(name = "scheduler")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File with one `url [priority]` per line
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Priority used when a line does not carry one
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    priority: i32,

    /// Skip repositories successfully scanned within this many days
    #[arg(long, default_value_t = 7)]
    rescan_days: u64,

    /// Attempts per queued scan (defaults to QUEUE_MAX_ATTEMPTS)
    #[arg(long)]
    max_attempts: Option<i32>,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Repository URLs, in addition to those read from --file
    urls: Vec<String>,
}

/// One repository to schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    url: String,
    priority: i32,
}

/// Parse `url [priority]` lines.
fn parse_targets(input: &str, default_priority: i32) -> anyhow::Result<Vec<Target>> {
    let mut targets = Vec::new();
    for (lineno, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(url) = fields.next() else {
            continue;
        };
        let priority = match fields.next() {
            Some(p) => p
                .parse()
                .with_context(|| format!("line {}: invalid priority {p:?}", lineno + 1))?,
            None => default_priority,
        };
        targets.push(Target {
            url: url.to_string(),
            priority,
        });
    }
    Ok(targets)
}

fn rescan_age(days: u64) -> anyhow::Result<Duration> {
    days.checked_mul(24 * 60 * 60)
        .map(Duration::from_secs)
        .with_context(|| format!("--rescan-days {days} is too large"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "scanqueue=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut targets = Vec::new();
    if let Some(path) = &cli.file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        targets.extend(parse_targets(&content, cli.priority)?);
    }
    targets.extend(cli.urls.iter().map(|url| Target {
        url: url.clone(),
        priority: cli.priority,
    }));
    if targets.is_empty() {
        anyhow::bail!("No repositories given; pass URLs or --file");
    }

    let config = AppConfig::from_env().ok();
    let database_url = cli
        .database_url
        .clone()
        .or_else(|| config.as_ref().map(|c| c.database_url.clone()))
        .context("DATABASE_URL must be set")?;
    let max_attempts = cli
        .max_attempts
        .or_else(|| config.as_ref().map(|c| c.queue.max_attempts))
        .unwrap_or(3);

    let min_age = rescan_age(cli.rescan_days)?;

    let pool = scanqueue::db::create_pool(&database_url, 5).await?;
    scanqueue::db::run_migrations(&pool).await?;

    let (mut queued, mut skipped, mut failed) = (0usize, 0usize, 0usize);

    for target in &targets {
        let repo_ref = RepositoryRef::from_url(target.url.clone());
        match scan_queue::enqueue_if_due(&pool, &repo_ref, target.priority, max_attempts, min_age)
            .await
        {
            Ok(EnqueueOutcome::Queued { entry }) => {
                queued += 1;
                println!("[queued]  {} (priority {}, entry {})", target.url, entry.priority, entry.id);
            }
            Ok(EnqueueOutcome::Skipped { reason, .. }) => {
                skipped += 1;
                println!("[skipped] {}: {reason}", target.url);
            }
            Err(e) => {
                failed += 1;
                tracing::error!(url = %target.url, error = %e, "Failed to schedule repository");
            }
        }
    }

    println!("\n{queued} queued, {skipped} skipped, {failed} failed");
    if failed > 0 {
        anyhow::bail!("{failed} repositories could not be scheduled");
    }
    Ok(())
}
