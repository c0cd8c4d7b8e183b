// Test mocks for the tally pipeline.
//
// MockSource implements TweetSource with scripted timeline pages per endpoint
// and a fixed post table for lookups. Every request is recorded so tests can
// assert on call counts and parameters.
//
// Plus helpers for building wire posts and users.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use x_client::{
    Endpoint, Entities, MentionEntity, ReferencedTweet, Tweet, TweetMetrics, User, UserMetrics,
};

use crate::traits::{SourcePage, TweetSource};

/// Id of the target account in tests.
pub const TARGET_ID: &str = "1";
/// Handle of the target account in tests.
pub const TARGET_HANDLE: &str = "JediSwap";

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

type Call = (Endpoint, Vec<(String, String)>);

pub struct MockSource {
    target_user_id: String,
    timelines: Mutex<HashMap<Endpoint, VecDeque<SourcePage>>>,
    users: Vec<User>,
    posts: HashMap<String, Tweet>,
    lookup_rate_limits: Mutex<usize>,
    calls: Mutex<Vec<Call>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            target_user_id: TARGET_ID.to_string(),
            timelines: Mutex::new(HashMap::new()),
            users: Vec::new(),
            posts: HashMap::new(),
            lookup_rate_limits: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Authors included with every page.
    pub fn with_users(mut self, users: Vec<User>) -> Self {
        self.users.extend(users);
        self
    }

    /// Posts answerable by id lookup.
    pub fn with_posts(mut self, posts: Vec<Tweet>) -> Self {
        for p in posts {
            self.posts.insert(p.id.clone(), p);
        }
        self
    }

    pub fn on_mentions(self, records: Vec<Tweet>, next: Option<&str>) -> Self {
        let endpoint = Endpoint::Mentions {
            user_id: self.target_user_id.clone(),
        };
        self.push(endpoint, page(records, next))
    }

    pub fn on_user_tweets(self, records: Vec<Tweet>, next: Option<&str>) -> Self {
        let endpoint = Endpoint::UserTweets {
            user_id: self.target_user_id.clone(),
        };
        self.push(endpoint, page(records, next))
    }

    pub fn on_quotes(self, tweet_id: &str, records: Vec<Tweet>, next: Option<&str>) -> Self {
        let endpoint = Endpoint::QuoteTweets {
            tweet_id: tweet_id.to_string(),
        };
        self.push(endpoint, page(records, next))
    }

    /// Queue `n` rate-limited responses on the mentions timeline.
    pub fn rate_limit_mentions(mut self, n: usize) -> Self {
        let endpoint = Endpoint::Mentions {
            user_id: self.target_user_id.clone(),
        };
        for _ in 0..n {
            self = self.push(endpoint.clone(), SourcePage::rate_limited());
        }
        self
    }

    /// The next `n` lookups answer with a rate limit.
    pub fn rate_limit_lookups(self, n: usize) -> Self {
        *self.lookup_rate_limits.lock().unwrap() = n;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn push(self, endpoint: Endpoint, page: SourcePage) -> Self {
        self.timelines
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push_back(page);
        self
    }
}

fn page(records: Vec<Tweet>, next: Option<&str>) -> SourcePage {
    SourcePage {
        records,
        next_cursor: next.map(str::to_string),
        ..Default::default()
    }
}

#[async_trait]
impl TweetSource for MockSource {
    async fn search(&self, endpoint: &Endpoint, params: &[(String, String)]) -> Result<SourcePage> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.clone(), params.to_vec()));

        if let Endpoint::Lookup { ids } = endpoint {
            let mut limits = self.lookup_rate_limits.lock().unwrap();
            if *limits > 0 {
                *limits -= 1;
                return Ok(SourcePage::rate_limited());
            }
            let mut out = SourcePage::default();
            out.records = ids
                .iter()
                .filter_map(|id| self.posts.get(id).cloned())
                .collect();
            out.included_authors = self.users.clone();
            return Ok(out);
        }

        let next = self
            .timelines
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(|q| q.pop_front());
        let mut page = next.unwrap_or_default();
        if !page.rate_limited {
            page.included_authors = self.users.clone();
        }
        Ok(page)
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Mid-February 2023, the default timestamp for test posts.
pub fn feb(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 2, day, 12, 0, 0).unwrap()
}

/// A post whose mention entities are every `@handle` token in `text`.
pub fn post(id: &str, author_id: &str, text: &str) -> Tweet {
    let mentions: Vec<MentionEntity> = text
        .split_whitespace()
        .filter_map(|w| w.strip_prefix('@'))
        .map(|h| h.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .filter(|h| !h.is_empty())
        .map(|h| MentionEntity {
            username: h.to_string(),
            id: None,
        })
        .collect();

    Tweet {
        id: id.to_string(),
        text: text.to_string(),
        author_id: Some(author_id.to_string()),
        created_at: Some(feb(15)),
        conversation_id: Some(id.to_string()),
        in_reply_to_user_id: None,
        referenced_tweets: None,
        entities: Some(Entities { mentions }),
        public_metrics: Some(TweetMetrics {
            retweet_count: 6,
            reply_count: 1,
            like_count: 10,
            quote_count: 4,
            impression_count: Some(1000),
        }),
        note_tweet: None,
    }
}

/// A reply to `parent_id`, authored by `author_id`, addressed to `parent_author`.
pub fn reply(id: &str, author_id: &str, text: &str, parent_id: &str, parent_author: &str) -> Tweet {
    let mut p = post(id, author_id, text);
    p.in_reply_to_user_id = Some(parent_author.to_string());
    p.referenced_tweets = Some(vec![ReferencedTweet {
        kind: "replied_to".to_string(),
        id: parent_id.to_string(),
    }]);
    p
}

/// A quote of `quoted_id`.
pub fn quote(id: &str, author_id: &str, text: &str, quoted_id: &str) -> Tweet {
    let mut p = post(id, author_id, text);
    p.referenced_tweets = Some(vec![ReferencedTweet {
        kind: "quoted".to_string(),
        id: quoted_id.to_string(),
    }]);
    p
}

pub fn user(id: &str, handle: &str, followers: u64) -> User {
    User {
        id: id.to_string(),
        username: handle.to_string(),
        name: None,
        public_metrics: Some(UserMetrics {
            followers_count: followers,
            following_count: 10,
            tweet_count: 100,
            listed_count: 0,
        }),
    }
}
