mod config;
mod consumer;
mod crawl;
mod fetch;
mod forum;
mod paginate;
mod queue;
mod record;
mod sink;

use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "opinion_scraper",
    about = "Product review crawler + forum opinion consumer"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the review site, write the wide-format CSV and queue product names
    Crawl {
        /// Max pages per pagination walk (list and per-product comments)
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Drain the work queue forever, appending forum opinions per product
    Consume,
    /// Show work queue depth
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut cfg = config::Config::from_env();

    let result = match cli.command {
        Commands::Crawl { max_pages } => {
            if let Some(n) = max_pages {
                cfg.max_walk_pages = n;
            }
            let fetcher: Arc<dyn fetch::Fetch> = Arc::new(fetch::SpiderFetcher::from_env()?);
            let mut queue = queue::WorkQueue::connect(&cfg.redis_url, &cfg.queue_name).await?;
            let summary = crawl::run(&cfg, fetcher, &mut queue).await?;
            println!(
                "Crawled {} products ({} abandoned, {} queue failures).",
                summary.products, summary.abandoned, summary.queue_failures
            );
            Ok(())
        }
        Commands::Consume => {
            // Authentication failure is fatal; the loop is never entered.
            let forum = forum::RedditClient::from_env().await?;
            let mut queue = queue::WorkQueue::connect(&cfg.redis_url, &cfg.queue_name).await?;
            consumer::run(&cfg, &mut queue, &forum).await
        }
        Commands::Stats => {
            let mut queue = queue::WorkQueue::connect(&cfg.redis_url, &cfg.queue_name).await?;
            let depth = queue.len().await?;
            println!("{} products waiting in '{}'", depth, cfg.queue_name);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
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
