use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::fetch::Fetch;
use crate::paginate::Walker;
use crate::queue::WorkQueue;
use crate::record::{ProductRecord, RecordBuilder};
use crate::sink;

const CONCURRENCY: usize = 10;
const LIST_DATE_FORMAT: &str = "%d %B %Y";
const COMMENTS_LINK_TEXT: &str = "Read all comments";

static REVIEW_ITEM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.review-item").unwrap());
static ITEM_DATE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.meta-item-time").unwrap());
static ITEM_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3.review-item-title a").unwrap());
static LIST_NEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a.prevnextbutton[title="Next page"]"#).unwrap());
static PRODUCT_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1.article-info-name").unwrap());
static SPEC_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.article-blurb-findings li").unwrap());
static SPEC_LABEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("b").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static COMMENT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p.uopin").unwrap());
static COMMENTS_NEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.pages-next").unwrap());

static WS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// End-of-run counters for the crawl entry point.
pub struct CrawlSummary {
    pub products: usize,
    pub abandoned: usize,
    pub queue_failures: usize,
}

/// Walk the review list, spawn one traversal per recent review, and
/// stream finalized records into the batch sink and the work queue.
///
/// Each traversal owns its record state exclusively; the only shared
/// resources are the result channel and, in the receive loop, the queue
/// client. Batch append and queue push are independent best-effort
/// effects: either can fail without blocking the other.
pub async fn run(
    cfg: &Config,
    fetcher: Arc<dyn Fetch>,
    queue: &mut WorkQueue,
) -> Result<CrawlSummary> {
    let start = Url::parse(&cfg.review_start_url)
        .with_context(|| format!("Invalid review start URL {:?}", cfg.review_start_url))?;

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let (tx, mut rx) = mpsc::channel::<Option<ProductRecord>>(CONCURRENCY * 2);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} products collected")?,
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    // ListPage state: follow the review list, spawning an independent
    // ReviewDetail traversal for every entry that passes the date filter.
    let mut walk = Walker::new(fetcher.as_ref(), start, cfg.max_walk_pages);
    let mut spawned = 0usize;
    while let Some(entries) = walk
        .step(|body, base| parse_list(body, base, cfg.cutoff_year))
        .await?
    {
        info!("Found {} recent reviews on list page", entries.len());
        for entry in entries {
            spawned += 1;
            let fetcher = Arc::clone(&fetcher);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let budget = cfg.max_walk_pages;
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                let record = match traverse_product(fetcher, entry, budget).await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("Traversal failed: {:#}", e);
                        None
                    }
                };
                let _ = tx.send(record).await;
            });
        }
    }
    // Close our copy so rx drains once every traversal has reported.
    drop(tx);
    info!("List walk complete, {} traversals spawned", spawned);

    let mut batch: Vec<ProductRecord> = Vec::new();
    let mut abandoned = 0usize;
    let mut queue_failures = 0usize;
    while let Some(result) = rx.recv().await {
        let Some(record) = result else {
            abandoned += 1;
            continue;
        };
        // Complete state: queue push and batch append, logged separately.
        match queue.push(&record.product_name).await {
            Ok(()) => info!("Sent '{}' to the work queue", record.product_name),
            Err(e) => {
                queue_failures += 1;
                warn!(
                    "Could not queue '{}' for enrichment: {}",
                    record.product_name, e
                );
            }
        }
        batch.push(record);
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Crawl finished: {} records collected, {} traversals abandoned",
        batch.len(),
        abandoned
    );
    sink::write_review_batch(&cfg.reviews_csv, &batch)?;

    Ok(CrawlSummary {
        products: batch.len(),
        abandoned,
        queue_failures,
    })
}

/// ReviewDetail and CommentsPage states for one product. Returns `None`
/// when the page is non-conforming (no product name): logged, not
/// retried.
async fn traverse_product(
    fetcher: Arc<dyn Fetch>,
    url: Url,
    page_budget: usize,
) -> Result<Option<ProductRecord>> {
    let mut builder = RecordBuilder::new(url.as_str());

    let body = fetcher.fetch(url.as_str()).await?;
    let detail = parse_detail(&body);
    let Some(name) = detail.product_name else {
        warn!("No product name found on {}", url);
        return Ok(None);
    };
    info!("Scraping review for: {}", name);
    builder.set_name(name.as_str());
    builder.merge_specs(detail.specifications);

    if let Some(href) = detail.comments_href {
        let start = url
            .join(&href)
            .with_context(|| format!("Bad comments link {:?} on {}", href, url))?;
        let mut walk = Walker::new(fetcher.as_ref(), start, page_budget);
        while let Some(texts) = walk.step(parse_comments).await? {
            info!("Collected {} comments for '{}'", texts.len(), name);
            builder.append_comments(texts);
        }
    }

    Ok(Some(builder.finalize()?))
}

/// Review list page: resolved detail URLs for entries dated on/after the
/// cutoff year, plus the next list page. Entries with no date are
/// skipped; unparseable dates are logged and skipped.
fn parse_list(body: &str, base: &Url, cutoff_year: i32) -> (Vec<Url>, Option<String>) {
    let doc = Html::parse_document(body);
    let mut entries = Vec::new();
    for item in doc.select(&REVIEW_ITEM) {
        let Some(date_text) = item.select(&ITEM_DATE).next().map(full_text) else {
            continue;
        };
        let date = match NaiveDate::parse_from_str(date_text.trim(), LIST_DATE_FORMAT) {
            Ok(date) => date,
            Err(_) => {
                warn!("Could not parse date format for: '{}'", date_text.trim());
                continue;
            }
        };
        if date.year() < cutoff_year {
            continue;
        }
        let Some(href) = item
            .select(&ITEM_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        match base.join(href) {
            Ok(resolved) => entries.push(resolved),
            Err(e) => warn!("Skipping unresolvable review link {:?}: {}", href, e),
        }
    }
    let next = doc
        .select(&LIST_NEXT)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_owned);
    (entries, next)
}

pub(crate) struct DetailPage {
    product_name: Option<String>,
    specifications: Vec<(String, String)>,
    comments_href: Option<String>,
}

/// Review detail page: product name, labeled specification pairs, and
/// the "view all comments" link if the review has one.
fn parse_detail(body: &str) -> DetailPage {
    let doc = Html::parse_document(body);

    let product_name = doc
        .select(&PRODUCT_NAME)
        .next()
        .map(full_text)
        .map(|s| normalize_ws(&s))
        .filter(|s| !s.is_empty());

    // Labels sit in a <b> ending with a separator; the value is whatever
    // text the row carries outside the label.
    let mut specifications = Vec::new();
    for row in doc.select(&SPEC_ROW) {
        let Some(label) = row.select(&SPEC_LABEL).next() else {
            continue;
        };
        let key = normalize_ws(&full_text(label));
        let key = key.trim_end_matches(':').trim();
        if key.is_empty() {
            continue;
        }
        let value = normalize_ws(&own_text(row));
        specifications.push((key.to_string(), value));
    }

    let comments_href = doc
        .select(&ANCHOR)
        .find(|a| full_text(*a).contains(COMMENTS_LINK_TEXT))
        .and_then(|a| a.value().attr("href"))
        .map(str::to_owned);

    DetailPage {
        product_name,
        specifications,
        comments_href,
    }
}

/// Comments page: opinion texts plus the next comments page link.
fn parse_comments(body: &str, _base: &Url) -> (Vec<String>, Option<String>) {
    let doc = Html::parse_document(body);
    let comments = doc
        .select(&COMMENT)
        .map(|el| normalize_ws(&full_text(el)))
        .filter(|s| !s.is_empty())
        .collect();
    let next = doc
        .select(&COMMENTS_NEXT)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_owned);
    (comments, next)
}

fn full_text(el: ElementRef) -> String {
    el.text().collect::<String>()
}

/// Text from the element's direct child text nodes only, excluding any
/// child elements (the spec label lives in its own element).
fn own_text(el: ElementRef) -> String {
    el.children()
        .filter_map(|node| node.value().as_text().map(|t| t.text.to_string()))
        .collect::<String>()
}

fn normalize_ws(s: &str) -> String {
    WS.replace_all(s.trim(), " ").into_owned()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testutil::StaticFetcher;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://reviews.test/reviews.php3").unwrap()
    }

    #[test]
    fn list_filter_keeps_only_recent_entries() {
        let body = fixture("review_list_page1.html");
        let (entries, next) = parse_list(&body, &base(), 2022);

        // One entry dated 2021, one dated 2023: only the recent one passes.
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].as_str(), "https://reviews.test/pixel_9-review.php");
        assert_eq!(next.as_deref(), Some("reviews.php3?page=2"));
    }

    #[test]
    fn list_cutoff_is_inclusive() {
        let body = fixture("review_list_page1.html");
        let (entries, _) = parse_list(&body, &base(), 2021);
        assert_eq!(entries.len(), 2);
        let (entries, _) = parse_list(&body, &base(), 2024);
        assert!(entries.is_empty());
    }

    #[test]
    fn detail_extracts_name_specs_and_comments_link() {
        let detail = parse_detail(&fixture("review_detail.html"));
        assert_eq!(detail.product_name.as_deref(), Some("Pixel 9"));
        assert_eq!(
            detail.specifications,
            [
                ("Display".to_string(), "6.3\" OLED".to_string()),
                ("Chipset".to_string(), "Tensor G4".to_string()),
            ]
        );
        assert_eq!(detail.comments_href.as_deref(), Some("pixel_9-comments.php"));
    }

    #[test]
    fn detail_without_comments_link_finalizes_with_zero_comments() {
        let detail = parse_detail(&fixture("review_detail_no_comments.html"));
        assert_eq!(detail.product_name.as_deref(), Some("Galaxy A55"));
        assert_eq!(
            detail.specifications,
            [
                ("Display".to_string(), "6.1\"".to_string()),
                ("Battery".to_string(), "4000mAh".to_string()),
            ]
        );
        assert!(detail.comments_href.is_none());

        let mut builder = RecordBuilder::new("https://reviews.test/galaxy_a55-review.php");
        builder.set_name(detail.product_name.unwrap());
        builder.merge_specs(detail.specifications);
        let record = builder.finalize().unwrap();
        assert!(record.comments.is_empty());
    }

    #[test]
    fn comments_page_extracts_texts_and_next_link() {
        let (comments, next) = parse_comments(&fixture("comments_page1.html"), &base());
        assert_eq!(comments, ["Great camera, battery could be better.", "Still my daily driver."]);
        assert_eq!(next.as_deref(), Some("pixel_9-comments-2.php"));

        let (comments, next) = parse_comments(&fixture("comments_page2.html"), &base());
        assert_eq!(comments, ["Switched from an iPhone, no regrets."]);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn traversal_accumulates_comments_across_pages() {
        let fetcher = Arc::new(StaticFetcher::new([
            (
                "https://reviews.test/pixel_9-review.php",
                fixture("review_detail.html"),
            ),
            (
                "https://reviews.test/pixel_9-comments.php",
                fixture("comments_page1.html"),
            ),
            (
                "https://reviews.test/pixel_9-comments-2.php",
                fixture("comments_page2.html"),
            ),
        ]));
        let url = Url::parse("https://reviews.test/pixel_9-review.php").unwrap();

        let record = traverse_product(fetcher, url, 100).await.unwrap().unwrap();

        assert_eq!(record.product_name, "Pixel 9");
        assert_eq!(record.source_url, "https://reviews.test/pixel_9-review.php");
        assert_eq!(
            record.comments,
            [
                "Great camera, battery could be better.",
                "Still my daily driver.",
                "Switched from an iPhone, no regrets."
            ]
        );
        assert_eq!(record.specifications["Display"], "6.3\" OLED");
    }

    #[tokio::test]
    async fn traversal_without_name_is_abandoned() {
        let fetcher = Arc::new(StaticFetcher::new([(
            "https://reviews.test/untitled-review.php",
            fixture("review_detail_untitled.html"),
        )]));
        let url = Url::parse("https://reviews.test/untitled-review.php").unwrap();

        let record = traverse_product(Arc::clone(&fetcher) as Arc<dyn Fetch>, url, 100).await.unwrap();

        assert!(record.is_none());
        // The abandoned traversal never followed the comments link.
        assert_eq!(fetcher.hits().len(), 1);
    }
}
