use anyhow::{anyhow, Result};
use async_trait::async_trait;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};

/// Fetches a rendered page body for a URL. Crawl logic never talks to the
/// network directly; it goes through this seam, which also makes every
/// traversal testable against canned pages.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// spider.cloud-backed fetcher. Rendering (JS, lazy comment sections)
/// happens service-side; we ask for the raw HTML of the settled page.
pub struct SpiderFetcher {
    spider: Spider,
}

impl SpiderFetcher {
    /// Reads `SPIDER_API_KEY`; a missing key is a fatal configuration
    /// fault surfaced before any crawling starts.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("SPIDER_API_KEY")
            .map_err(|_| anyhow!("SPIDER_API_KEY environment variable must be set"))?;
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow!("Failed to create Spider client: {}", e))?;
        Ok(Self { spider })
    }
}

#[async_trait]
impl Fetch for SpiderFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| anyhow!("Fetch failed for {}: {}", url, e))?;

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };

        parsed
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("No content in fetch response for {}", url))
    }
}
