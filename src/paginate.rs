use std::collections::HashSet;

use anyhow::Result;
use tracing::warn;
use url::Url;

use crate::fetch::Fetch;

/// Follow-next-link traversal over a paginated chain.
///
/// Each `step` fetches the pending page, applies a page-type-specific
/// parse function, and queues the continuation link it returns. The walk
/// is finite and non-restartable: it ends when a page yields no next
/// link, when a link points back at a page already visited, or when the
/// page budget runs out. The next pointer is external input, so both
/// guards terminate the walk with a warning instead of looping forever.
pub struct Walker<'a> {
    fetcher: &'a dyn Fetch,
    next: Option<Url>,
    seen: HashSet<String>,
    budget: usize,
}

impl<'a> Walker<'a> {
    pub fn new(fetcher: &'a dyn Fetch, start: Url, budget: usize) -> Self {
        Self {
            fetcher,
            next: Some(start),
            seen: HashSet::new(),
            budget,
        }
    }

    /// Fetch the pending page and run `parse` over it, returning the
    /// page's extracted items, or `None` once the chain ends. `parse`
    /// receives the page body and its URL (for resolving relative links)
    /// and returns the items plus an optional next-page href.
    pub async fn step<T, F>(&mut self, parse: F) -> Result<Option<Vec<T>>>
    where
        F: FnOnce(&str, &Url) -> (Vec<T>, Option<String>),
    {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };
        if self.budget == 0 {
            warn!("Page budget exhausted at {}, stopping walk", url);
            return Ok(None);
        }
        if !self.seen.insert(url.as_str().to_owned()) {
            warn!("Pagination loop detected at {}, stopping walk", url);
            return Ok(None);
        }
        self.budget -= 1;

        let body = self.fetcher.fetch(url.as_str()).await?;
        let (items, next_href) = parse(&body, &url);

        self.next = next_href.and_then(|href| match url.join(&href) {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                warn!("Unresolvable next link {:?} on {}: {}", href, url, e);
                None
            }
        });

        Ok(Some(items))
    }
}

// ── Tests ──
