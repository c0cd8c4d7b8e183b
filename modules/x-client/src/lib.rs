pub mod error;
pub mod types;

pub use error::{Result, XError};
pub use types::{
    ApiProblem, Endpoint, Entities, Includes, MentionEntity, Meta, NoteTweet, ReferencedTweet,
    Tweet, TweetMetrics, TweetsResponse, User, UserMetrics,
};

use reqwest::StatusCode;
use types::{EXPANSIONS, TWEET_FIELDS, USER_FIELDS};

const BASE_URL: &str = "https://api.twitter.com";

/// Largest page size the timeline endpoints accept.
pub const MAX_RESULTS: u32 = 100;

/// Largest id batch the lookup endpoint accepts.
pub const MAX_LOOKUP_IDS: usize = 100;

pub struct XClient {
    client: reqwest::Client,
    bearer_token: String,
    base_url: String,
}

impl XClient {
    pub fn new(bearer_token: String) -> Self {
        Self::with_base_url(bearer_token, BASE_URL.to_string())
    }

    pub fn with_base_url(bearer_token: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bearer_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch one page from `endpoint`.
    ///
    /// `extra` carries caller parameters (`since_id`, `start_time`, `end_time`,
    /// `pagination_token`); the field selection and expansions are added here.
    /// A 429 maps to [`XError::RateLimited`] so callers can back off; any other
    /// non-success status is an [`XError::Api`].
    pub async fn get_page(
        &self,
        endpoint: &Endpoint,
        extra: &[(String, String)],
    ) -> Result<TweetsResponse> {
        let url = format!("{}{}", self.base_url, endpoint.path());

        let mut query: Vec<(String, String)> = vec![
            ("tweet.fields".into(), TWEET_FIELDS.into()),
            ("user.fields".into(), USER_FIELDS.into()),
            ("expansions".into(), EXPANSIONS.into()),
        ];
        match endpoint {
            Endpoint::Lookup { ids } => query.push(("ids".into(), ids.join(","))),
            _ => query.push(("max_results".into(), MAX_RESULTS.to_string())),
        }
        query.extend(extra.iter().cloned());

        tracing::debug!(%url, params = query.len(), "x: GET");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let reset_at = resp
                .headers()
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok());
            tracing::warn!(%url, ?reset_at, "x: rate limited");
            return Err(XError::RateLimited { reset_at });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(XError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let page: TweetsResponse = serde_json::from_str(&body)?;
        tracing::debug!(
            count = page.data.as_ref().map(|d| d.len()).unwrap_or(0),
            next = page.meta.as_ref().and_then(|m| m.next_token.as_deref()),
            "x: page received"
        );
        Ok(page)
    }
}
