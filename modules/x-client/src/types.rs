use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Request shapes ---

/// Which v2 timeline or lookup endpoint to hit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `GET /2/users/:id/mentions`
    Mentions { user_id: String },
    /// `GET /2/users/:id/tweets`
    UserTweets { user_id: String },
    /// `GET /2/tweets/:id/quote_tweets`
    QuoteTweets { tweet_id: String },
    /// `GET /2/tweets?ids=...` (at most 100 ids per call)
    Lookup { ids: Vec<String> },
}

impl Endpoint {
    /// Path relative to the API base URL.
    pub fn path(&self) -> String {
        match self {
            Endpoint::Mentions { user_id } => format!("/2/users/{}/mentions", user_id),
            Endpoint::UserTweets { user_id } => format!("/2/users/{}/tweets", user_id),
            Endpoint::QuoteTweets { tweet_id } => format!("/2/tweets/{}/quote_tweets", tweet_id),
            Endpoint::Lookup { .. } => "/2/tweets".to_string(),
        }
    }

    /// Lookups carry their ids as a query parameter and never paginate.
    pub fn is_lookup(&self) -> bool {
        matches!(self, Endpoint::Lookup { .. })
    }
}

/// Tweet and user fields requested on every call.
pub const TWEET_FIELDS: &str =
    "created_at,public_metrics,in_reply_to_user_id,referenced_tweets,conversation_id,entities,note_tweet";
pub const USER_FIELDS: &str = "id,username,entities,public_metrics";
pub const EXPANSIONS: &str = "author_id,in_reply_to_user_id";

// --- Response shapes ---

/// Envelope shared by every tweet-returning endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetsResponse {
    pub data: Option<Vec<Tweet>>,
    pub includes: Option<Includes>,
    pub meta: Option<Meta>,
    /// Partial errors, e.g. ids in a lookup that no longer resolve.
    pub errors: Option<Vec<ApiProblem>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<User>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Meta {
    pub result_count: Option<u32>,
    pub newest_id: Option<String>,
    pub oldest_id: Option<String>,
    pub next_token: Option<String>,
}

/// A per-item problem reported alongside a successful response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiProblem {
    /// Id of the resource the problem refers to (`value` in the payload).
    #[serde(rename = "value")]
    pub resource_id: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
    #[serde(rename = "type")]
    pub problem_type: Option<String>,
}

/// A single post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    pub author_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub conversation_id: Option<String>,
    pub in_reply_to_user_id: Option<String>,
    pub referenced_tweets: Option<Vec<ReferencedTweet>>,
    pub entities: Option<Entities>,
    pub public_metrics: Option<TweetMetrics>,
    /// Present when the post exceeds the classic length limit; carries the full text.
    pub note_tweet: Option<NoteTweet>,
}

impl Tweet {
    /// Full text of the post, preferring the untruncated long-form body.
    pub fn content(&self) -> &str {
        self.note_tweet
            .as_ref()
            .map(|n| n.text.as_str())
            .unwrap_or(self.text.as_str())
    }

    /// Usernames from the mention entities, in order of appearance.
    pub fn mention_usernames(&self) -> Vec<String> {
        self.entities
            .as_ref()
            .map(|e| e.mentions.iter().map(|m| m.username.clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteTweet {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencedTweet {
    /// `replied_to`, `quoted` or `retweeted`.
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub mentions: Vec<MentionEntity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionEntity {
    pub username: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetMetrics {
    pub retweet_count: u64,
    pub reply_count: u64,
    pub like_count: u64,
    pub quote_count: u64,
    /// Not returned for posts older than the impression-tracking rollout.
    pub impression_count: Option<u64>,
}

/// An account, as returned in `includes.users`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub public_metrics: Option<UserMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetrics {
    pub followers_count: u64,
    pub following_count: u64,
    pub tweet_count: u64,
    pub listed_count: u64,
}
