use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::forum::ForumSource;
use crate::queue::WorkQueue;
use crate::sink::OpinionSink;

/// Drain the work queue forever, enriching each product with forum
/// opinions and appending them durably to the long-format stream.
///
/// Faults are contained at the smallest unit that keeps the loop alive:
/// a bad product is logged and skipped, a queue-level fault pauses and
/// resumes. One product is fully processed before the next pop. This
/// function only returns if the output sink cannot be opened.
pub async fn run(cfg: &Config, queue: &mut WorkQueue, forum: &dyn ForumSource) -> Result<()> {
    let mut sink = OpinionSink::open(&cfg.opinions_csv)?;
    let mut processed: HashSet<String> = HashSet::new();

    info!("Consumer waiting for products from the queue...");
    loop {
        let product_name = match queue.blocking_pop(None).await {
            Ok(Some(name)) => name,
            Ok(None) => continue,
            Err(e) => {
                error!(
                    "Queue error: {}. Pausing {}s before resuming.",
                    e, cfg.consumer_pause_secs
                );
                tokio::time::sleep(Duration::from_secs(cfg.consumer_pause_secs)).await;
                continue;
            }
        };
        info!("Received product from queue: '{}'", product_name);

        if cfg.dedupe_products && processed.contains(&product_name) {
            info!("Already processed '{}' this run, skipping redelivery", product_name);
            continue;
        }

        match enrich_product(forum, &mut sink, cfg, &product_name).await {
            Ok(rows) => {
                if rows > 0 {
                    info!(
                        "Appended {} comments for '{}' to {}",
                        rows,
                        product_name,
                        cfg.opinions_csv.display()
                    );
                }
                if cfg.dedupe_products {
                    processed.insert(product_name);
                }
            }
            // A single bad product never halts the loop.
            Err(e) => warn!("Skipping '{}': {:#}", product_name, e),
        }
    }
}

/// Fetch opinions for one product and append them durably. Returns the
/// number of rows written; zero search hits is a valid empty outcome,
/// not an error.
pub(crate) async fn enrich_product(
    forum: &dyn ForumSource,
    sink: &mut OpinionSink,
    cfg: &Config,
    product_name: &str,
) -> Result<usize> {
    info!("Searching for '{}' in {}...", product_name, cfg.forum_community);
    let threads = forum
        .search_threads(&cfg.forum_community, product_name, cfg.forum_post_limit)
        .await?;
    if threads.is_empty() {
        warn!("No forum threads found for '{}'", product_name);
        return Ok(0);
    }

    let mut comments = Vec::new();
    for thread in &threads {
        info!("Collecting comments from thread: '{}'", thread.title);
        comments.extend(forum.thread_comments(thread).await?);
    }
    info!("Found {} comments for '{}'", comments.len(), product_name);
    if comments.is_empty() {
        return Ok(0);
    }

    sink.append(product_name, &comments)
}

// ── Tests ──
