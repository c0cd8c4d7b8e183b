//! Paginated fetching with rate-limit backoff.
//!
//! Every request goes through [`Fetcher::request`]: a rate-limited response
//! sleeps for the configured cooldown and retries up to the configured limit,
//! after which the category stops with [`TerminalStatus::RateLimited`] and
//! keeps whatever it already collected. Pages are joined against their
//! included authors, recorded in the memo and archived before conversion.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use tally_common::config::FetchConfig;
use tally_common::{
    AuthorSnapshot, Candidate, Metrics, Reference, ReferenceKind, SourceTag, TallyError, TweetId,
};
use x_client::{Endpoint, Tweet, MAX_LOOKUP_IDS};

use crate::backup::PageArchive;
use crate::classifier::ParentMentions;
use crate::memo::{MemoHit, MemoStore};
use crate::traits::{SourcePage, TweetSource};

// ---------------------------------------------------------------------------
// Categories and windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCategory {
    /// Posts mentioning the target account.
    Mentions,
    /// The target account's own timeline.
    TargetPosts,
    /// Quotes of one of the target's posts.
    QuotesOf(TweetId),
}

impl FetchCategory {
    pub fn label(&self) -> String {
        match self {
            FetchCategory::Mentions => "mentions".to_string(),
            FetchCategory::TargetPosts => "target_posts".to_string(),
            FetchCategory::QuotesOf(id) => format!("quotes_of_{id}"),
        }
    }

    pub fn source_tag(&self) -> SourceTag {
        match self {
            FetchCategory::Mentions => SourceTag::Mentions,
            FetchCategory::TargetPosts => SourceTag::TargetTimeline,
            FetchCategory::QuotesOf(_) => SourceTag::Quote,
        }
    }

    fn endpoint(&self, target_user_id: &str) -> Endpoint {
        match self {
            FetchCategory::Mentions => Endpoint::Mentions {
                user_id: target_user_id.to_string(),
            },
            FetchCategory::TargetPosts => Endpoint::UserTweets {
                user_id: target_user_id.to_string(),
            },
            FetchCategory::QuotesOf(id) => Endpoint::QuoteTweets {
                tweet_id: id.to_string(),
            },
        }
    }
}

/// Restricts a timeline fetch. An explicit time window takes precedence over
/// `since_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchWindow {
    pub since_id: Option<TweetId>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl FetchWindow {
    pub fn since(id: TweetId) -> Self {
        Self {
            since_id: Some(id),
            ..Default::default()
        }
    }

    pub fn has_time_bounds(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }

    pub fn params(&self) -> Vec<(String, String)> {
        let fmt = |ts: &DateTime<Utc>| ts.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let mut params = Vec::new();
        if self.has_time_bounds() {
            if let Some(start) = &self.start_time {
                params.push(("start_time".to_string(), fmt(start)));
            }
            if let Some(end) = &self.end_time {
                params.push(("end_time".to_string(), fmt(end)));
            }
        } else if let Some(id) = &self.since_id {
            params.push(("since_id".to_string(), id.to_string()));
        }
        params
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    /// The source reported no further pages.
    Exhausted,
    /// Gave up after the retry budget; results are partial.
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub candidates: Vec<Candidate>,
    pub status: TerminalStatus,
    pub pages: usize,
}

impl FetchOutcome {
    /// Largest id fetched, the next cutoff for this category.
    pub fn newest_id(&self) -> Option<&TweetId> {
        self.candidates.iter().map(|c| &c.id).max()
    }
}

/// Target timeline plus the quotes of each of its posts.
#[derive(Debug, Clone)]
pub struct QuoteSweep {
    pub target_posts: FetchOutcome,
    pub quotes: Vec<Candidate>,
    pub status: TerminalStatus,
}

#[derive(Debug, Clone, Default)]
pub struct LookupOutcome {
    pub found: Vec<Tweet>,
    /// Ids the source no longer returns.
    pub missing: Vec<TweetId>,
    /// Ids not looked up because the retry budget ran out.
    pub unresolved: Vec<TweetId>,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

pub struct Fetcher<'a, S: TweetSource + ?Sized> {
    source: &'a S,
    target_user_id: String,
    archive: Option<PageArchive>,
    cooldown: Duration,
    retries: u32,
}

impl<'a, S: TweetSource + ?Sized> Fetcher<'a, S> {
    pub fn new(source: &'a S, target_user_id: impl Into<String>, config: &FetchConfig) -> Self {
        Self {
            source,
            target_user_id: target_user_id.into(),
            archive: None,
            cooldown: config.cooldown(),
            retries: config.rate_limit_retries,
        }
    }

    /// Archive every raw page under `archive` as it arrives.
    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Issue one request, sleeping through rate limits. `None` means the
    /// retry budget ran out.
    async fn request(
        &self,
        endpoint: &Endpoint,
        params: &[(String, String)],
    ) -> Result<Option<SourcePage>> {
        let mut attempt = 0;
        loop {
            let page = self.source.search(endpoint, params).await?;
            if !page.rate_limited {
                return Ok(Some(page));
            }
            if attempt >= self.retries {
                warn!(path = %endpoint.path(), attempts = attempt + 1, "Rate limited, giving up");
                return Ok(None);
            }
            attempt += 1;
            warn!(
                path = %endpoint.path(),
                attempt,
                cooldown_secs = self.cooldown.as_secs(),
                "Rate limited, cooling down"
            );
            tokio::time::sleep(self.cooldown).await;
        }
    }

    /// Page through one category until the source is exhausted or the retry
    /// budget runs out. An id appearing twice within the category is an error.
    pub async fn fetch(
        &self,
        category: &FetchCategory,
        window: &FetchWindow,
        memo: &mut MemoStore,
    ) -> Result<FetchOutcome> {
        let endpoint = category.endpoint(&self.target_user_id);
        let base = window.params();
        let label = category.label();

        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        let status = loop {
            let mut params = base.clone();
            if let Some(token) = &cursor {
                params.push(("pagination_token".to_string(), token.clone()));
            }

            let Some(page) = self.request(&endpoint, &params).await? else {
                break TerminalStatus::RateLimited;
            };
            pages += 1;

            memo.record_authors(&page.included_authors);
            memo.record_posts(&page.records);
            if let Some(archive) = &self.archive {
                archive.write_page(&label, &page.records)?;
            }

            for post in &page.records {
                let candidate = candidate_from_post(post, memo, category.source_tag())?;
                if !seen.insert(candidate.id.clone()) {
                    return Err(TallyError::DuplicateId {
                        id: candidate.id,
                        context: format!("{label} fetch"),
                    }
                    .into());
                }
                candidates.push(candidate);
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break TerminalStatus::Exhausted,
            }
        };

        info!(
            category = label.as_str(),
            pages,
            fetched = candidates.len(),
            status = ?status,
            "Category fetched"
        );

        Ok(FetchOutcome {
            candidates,
            status,
            pages,
        })
    }

    /// Fetch the target timeline in `window`, then the quotes of each of the
    /// target's own posts (retweets skipped), one post at a time.
    pub async fn quotes_of_target(
        &self,
        window: &FetchWindow,
        memo: &mut MemoStore,
    ) -> Result<QuoteSweep> {
        let target_posts = self.fetch(&FetchCategory::TargetPosts, window, memo).await?;
        let mut status = target_posts.status;

        let own: Vec<TweetId> = target_posts
            .candidates
            .iter()
            .filter(|c| !c.is_retweet())
            .map(|c| c.id.clone())
            .collect();

        let mut quotes = Vec::new();
        let mut seen = HashSet::new();
        for post_id in own {
            let outcome = self
                .fetch(&FetchCategory::QuotesOf(post_id), &FetchWindow::default(), memo)
                .await?;
            for quote in outcome.candidates {
                if seen.insert(quote.id.clone()) {
                    quotes.push(quote);
                }
            }
            if outcome.status == TerminalStatus::RateLimited {
                status = TerminalStatus::RateLimited;
                break;
            }
        }

        info!(
            target_posts = target_posts.candidates.len(),
            quotes = quotes.len(),
            status = ?status,
            "Quote sweep finished"
        );

        Ok(QuoteSweep {
            target_posts,
            quotes,
            status,
        })
    }

    /// Look up posts by id in batches. Found posts and tombstones for the
    /// missing ones are written to the memo.
    pub async fn lookup(&self, ids: &[TweetId], memo: &mut MemoStore) -> Result<LookupOutcome> {
        let mut outcome = LookupOutcome::default();

        let chunks: Vec<&[TweetId]> = ids.chunks(MAX_LOOKUP_IDS).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let endpoint = Endpoint::Lookup {
                ids: chunk.iter().map(|id| id.to_string()).collect(),
            };
            let Some(page) = self.request(&endpoint, &[]).await? else {
                outcome
                    .unresolved
                    .extend(chunks[i..].iter().flat_map(|c| c.iter().cloned()));
                break;
            };

            memo.record_authors(&page.included_authors);
            memo.record_posts(&page.records);

            let returned: HashSet<&str> = page.records.iter().map(|p| p.id.as_str()).collect();
            for id in chunk.iter() {
                if !returned.contains(id.as_str()) {
                    memo.tombstone_post(id);
                    outcome.missing.push(id.clone());
                }
            }
            outcome.found.extend(page.records);
        }

        info!(
            requested = ids.len(),
            found = outcome.found.len(),
            missing = outcome.missing.len(),
            unresolved = outcome.unresolved.len(),
            "Lookup finished"
        );
        Ok(outcome)
    }

    /// Mention sets of the given parent posts, memo first, then the network.
    pub async fn resolve_parents(
        &self,
        ids: &[TweetId],
        memo: &mut MemoStore,
    ) -> Result<HashMap<TweetId, ParentMentions>> {
        let mut resolved = HashMap::new();
        let mut misses = Vec::new();

        for id in ids {
            if resolved.contains_key(id) || misses.contains(id) {
                continue;
            }
            match memo.post(id) {
                Some(MemoHit::Found(post)) => {
                    resolved.insert(id.clone(), ParentMentions::Resolved(mention_set(&post)));
                }
                Some(MemoHit::Gone) => {
                    resolved.insert(id.clone(), ParentMentions::Missing);
                }
                None => misses.push(id.clone()),
            }
        }

        if !misses.is_empty() {
            let outcome = self.lookup(&misses, memo).await?;
            for post in &outcome.found {
                if let Ok(id) = TweetId::parse(&post.id) {
                    resolved.insert(id, ParentMentions::Resolved(mention_set(post)));
                }
            }
            for id in outcome.missing {
                resolved.insert(id, ParentMentions::Missing);
            }
            for id in outcome.unresolved {
                resolved.insert(id, ParentMentions::Unresolved);
            }
        }

        Ok(resolved)
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn mention_set(post: &Tweet) -> std::collections::BTreeSet<String> {
    post.mention_usernames().into_iter().collect()
}

/// Build a [`Candidate`] from a wire post, joining the author from the memo.
/// An author the memo does not know yields an unresolved snapshot.
pub fn candidate_from_post(
    post: &Tweet,
    memo: &MemoStore,
    source: SourceTag,
) -> std::result::Result<Candidate, TallyError> {
    let malformed = |reason: &str| TallyError::MalformedRecord {
        id: post.id.clone(),
        reason: reason.to_string(),
    };

    let id = TweetId::parse(&post.id)?;
    let author_id = post
        .author_id
        .clone()
        .ok_or_else(|| malformed("missing author_id"))?;
    let created_at = post
        .created_at
        .ok_or_else(|| malformed("missing created_at"))?;

    let mut referenced = Vec::new();
    for r in post.referenced_tweets.iter().flatten() {
        let Some(kind) = ReferenceKind::parse(&r.kind) else {
            warn!(id = post.id.as_str(), kind = r.kind.as_str(), "Unknown reference kind");
            continue;
        };
        referenced.push(Reference {
            kind,
            id: TweetId::parse(&r.id)?,
        });
    }
    let in_reply_to_id = referenced
        .iter()
        .find(|r| r.kind == ReferenceKind::RepliedTo)
        .map(|r| r.id.clone());

    let metrics = match &post.public_metrics {
        Some(m) => Metrics {
            impressions: m.impression_count,
            replies: Some(m.reply_count),
            retweets: Some(m.retweet_count),
            likes: Some(m.like_count),
            quotes: Some(m.quote_count),
        },
        None => Metrics::unavailable(),
    };

    let author = match memo.author(&author_id) {
        Some(user) => {
            let m = user.public_metrics;
            AuthorSnapshot {
                handle: Some(user.username),
                followers: m.map(|m| m.followers_count),
                following: m.map(|m| m.following_count),
                posts: m.map(|m| m.tweet_count),
                listed: m.map(|m| m.listed_count),
            }
        }
        None => {
            warn!(id = post.id.as_str(), author_id = author_id.as_str(), "Author not resolved");
            AuthorSnapshot::default()
        }
    };

    Ok(Candidate {
        id,
        author_id,
        text: post.content().to_string(),
        created_at,
        conversation_id: post.conversation_id.clone(),
        in_reply_to_id,
        in_reply_to_author_id: post.in_reply_to_user_id.clone(),
        referenced,
        mentions: mention_set(post),
        metrics,
        author,
        source,
    })
}
