use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Runtime configuration, assembled from environment variables with
/// compiled defaults. Secrets (API keys, forum credentials) are read by
/// the collaborator that needs them rather than carried here.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub queue_name: String,
    pub review_start_url: String,
    /// Reviews dated before this year are skipped on the list pages.
    pub cutoff_year: i32,
    /// Upper bound on pages followed per pagination walk. The next-page
    /// pointer is untrusted input, so every walk carries a budget.
    pub max_walk_pages: usize,
    pub reviews_csv: PathBuf,
    pub opinions_csv: PathBuf,
    pub forum_community: String,
    pub forum_post_limit: usize,
    /// How long the consumer pauses after a queue-level fault.
    pub consumer_pause_secs: u64,
    /// Skip product names already processed in this consumer run.
    /// Off by default: redeliveries are reprocessed as they arrive.
    pub dedupe_products: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            queue_name: env_or("OPINION_QUEUE", "product_queue"),
            review_start_url: env_or("REVIEW_START_URL", "https://www.gsmarena.com/reviews.php3"),
            cutoff_year: env_parse("REVIEW_CUTOFF_YEAR", 2022),
            max_walk_pages: env_parse("MAX_WALK_PAGES", 500),
            reviews_csv: PathBuf::from(env_or("REVIEWS_CSV", "data/reviews.csv")),
            opinions_csv: PathBuf::from(env_or("OPINIONS_CSV", "data/opinions.csv")),
            forum_community: env_or("FORUM_COMMUNITY", "Android"),
            forum_post_limit: env_parse("FORUM_POST_LIMIT", 5),
            consumer_pause_secs: env_parse("CONSUMER_PAUSE_SECS", 10),
            dedupe_products: env_parse("DEDUPE_PRODUCTS", false),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
