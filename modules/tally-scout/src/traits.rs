// Trait boundary between the pipeline and the platform API.
//
// TweetSource wraps every read the pipeline makes. The live implementation is
// XClient; tests use MockSource from `testing`. A rate-limit response is data
// here (`rate_limited: true`), not an error, so the fetcher owns the backoff.

use anyhow::Result;
use async_trait::async_trait;

use x_client::{Endpoint, Tweet, User, XClient, XError};

/// One page of results from a search endpoint.
#[derive(Debug, Clone, Default)]
pub struct SourcePage {
    pub records: Vec<Tweet>,
    /// Author records for the page, joined on `author_id`.
    pub included_authors: Vec<User>,
    pub next_cursor: Option<String>,
    pub rate_limited: bool,
}

impl SourcePage {
    pub fn rate_limited() -> Self {
        Self {
            rate_limited: true,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait TweetSource: Send + Sync {
    /// Fetch a single page. `params` carries window and cursor parameters.
    async fn search(&self, endpoint: &Endpoint, params: &[(String, String)]) -> Result<SourcePage>;
}

#[async_trait]
impl TweetSource for XClient {
    async fn search(&self, endpoint: &Endpoint, params: &[(String, String)]) -> Result<SourcePage> {
        let resp = match self.get_page(endpoint, params).await {
            Ok(resp) => resp,
            Err(XError::RateLimited { .. }) => return Ok(SourcePage::rate_limited()),
            Err(e) => return Err(e.into()),
        };

        Ok(SourcePage {
            records: resp.data.unwrap_or_default(),
            included_authors: resp.includes.map(|i| i.users).unwrap_or_default(),
            next_cursor: resp.meta.and_then(|m| m.next_token),
            rate_limited: false,
        })
    }
}
