use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";

/// A discussion thread matched by a community search.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadRef {
    pub id: String,
    pub title: String,
}

/// Source of public opinion text, searched per product. The consumer
/// only ever sees this trait; the transport below is one implementation.
#[async_trait]
pub trait ForumSource: Send + Sync {
    /// Search `community` for `query`, returning up to `limit` threads.
    async fn search_threads(
        &self,
        community: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ThreadRef>>;

    /// All comment bodies under a thread, flattened in tree order.
    async fn thread_comments(&self, thread: &ThreadRef) -> Result<Vec<String>>;
}

/// Reddit client over the public OAuth API (client-credentials grant).
pub struct RedditClient {
    http: reqwest::Client,
    token: String,
}

impl RedditClient {
    /// Authenticates with `REDDIT_CLIENT_ID` / `REDDIT_CLIENT_SECRET`
    /// (`REDDIT_USER_AGENT` optional). Failure here is fatal: the
    /// consumer process exits instead of entering its loop.
    pub async fn from_env() -> Result<Self> {
        let client_id = std::env::var("REDDIT_CLIENT_ID")
            .map_err(|_| anyhow!("REDDIT_CLIENT_ID environment variable must be set"))?;
        let client_secret = std::env::var("REDDIT_CLIENT_SECRET")
            .map_err(|_| anyhow!("REDDIT_CLIENT_SECRET environment variable must be set"))?;
        let user_agent = std::env::var("REDDIT_USER_AGENT")
            .unwrap_or_else(|_| concat!("opinion_scraper/", env!("CARGO_PKG_VERSION")).to_string());

        let http = reqwest::Client::builder().user_agent(user_agent).build()?;
        let body: serde_json::Value = http
            .post(TOKEN_URL)
            .basic_auth(&client_id, Some(&client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("Could not reach the forum token endpoint")?
            .error_for_status()
            .context("Forum authentication rejected")?
            .json()
            .await?;

        let token = body
            .get("access_token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow!("No access_token in forum auth response"))?
            .to_string();

        info!("Authenticated with the forum API");
        Ok(Self { http, token })
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: ThreadRef,
}

#[async_trait]
impl ForumSource for RedditClient {
    async fn search_threads(
        &self,
        community: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ThreadRef>> {
        // Exact-phrase search, restricted to the target community.
        let quoted = format!("\"{}\"", query);
        let limit = limit.to_string();
        let listing: Listing = self
            .http
            .get(format!("{}/r/{}/search", API_BASE, community))
            .bearer_auth(&self.token)
            .query(&[
                ("q", quoted.as_str()),
                ("restrict_sr", "1"),
                ("sort", "relevance"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Unexpected search response for {:?}", query))?;

        Ok(listing.data.children.into_iter().map(|c| c.data).collect())
    }

    async fn thread_comments(&self, thread: &ThreadRef) -> Result<Vec<String>> {
        let body: serde_json::Value = self
            .http
            .get(format!("{}/comments/{}", API_BASE, thread.id))
            .bearer_auth(&self.token)
            .query(&[("limit", "500"), ("depth", "50")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Unexpected comments response for thread {}", thread.id))?;

        // The response is a two-element array: the submission listing,
        // then the comment tree.
        let mut comments = Vec::new();
        if let Some(tree) = body.get(1) {
            collect_comment_bodies(tree, &mut comments);
        }
        Ok(comments)
    }
}

/// Walk a comment listing, collecting every comment body in tree order.
/// Unexpanded "load more" stubs carry no text and are skipped.
fn collect_comment_bodies(node: &serde_json::Value, out: &mut Vec<String>) {
    let Some(children) = node.pointer("/data/children").and_then(|c| c.as_array()) else {
        return;
    };
    for child in children {
        if child.get("kind").and_then(|k| k.as_str()) != Some("t1") {
            continue;
        }
        if let Some(body) = child.pointer("/data/body").and_then(|b| b.as_str()) {
            out.push(body.to_string());
        }
        if let Some(replies) = child.pointer("/data/replies") {
            if replies.is_object() {
                collect_comment_bodies(replies, out);
            }
        }
    }
}

// ── Tests ──
