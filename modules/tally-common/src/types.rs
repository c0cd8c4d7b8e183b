use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::id::TweetId;

// --- Post references ---

/// How a post points at another post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    RepliedTo,
    Quoted,
    Retweeted,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::RepliedTo => "replied_to",
            ReferenceKind::Quoted => "quoted",
            ReferenceKind::Retweeted => "retweeted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "replied_to" => Some(ReferenceKind::RepliedTo),
            "quoted" => Some(ReferenceKind::Quoted),
            "retweeted" => Some(ReferenceKind::Retweeted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: TweetId,
}

// --- Fetch provenance ---

/// Which fetch produced a candidate. Kept on every row for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// The target account's mentions timeline.
    Mentions,
    /// A quote of one of the target account's own posts.
    Quote,
    /// The target account's own timeline (drives quote discovery, never scored).
    TargetTimeline,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Mentions => "mentions",
            SourceTag::Quote => "quote",
            SourceTag::TargetTimeline => "target_timeline",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "mentions" => Some(SourceTag::Mentions),
            "quote" => Some(SourceTag::Quote),
            "target_timeline" => Some(SourceTag::TargetTimeline),
            _ => None,
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Metrics ---

/// Public engagement counters. `None` means the value could not be
/// determined, which is not the same thing as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub impressions: Option<u64>,
    pub replies: Option<u64>,
    pub retweets: Option<u64>,
    pub likes: Option<u64>,
    pub quotes: Option<u64>,
}

impl Metrics {
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Author counters denormalized onto a post at fetch time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorSnapshot {
    pub handle: Option<String>,
    pub followers: Option<u64>,
    pub following: Option<u64>,
    pub posts: Option<u64>,
    pub listed: Option<u64>,
}

impl AuthorSnapshot {
    /// False when the author could not be resolved (suspended, deleted, or
    /// missing from the page's included users).
    pub fn is_resolved(&self) -> bool {
        self.followers.is_some()
    }
}

// --- Candidate ---

/// One fetched post, before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: TweetId,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub conversation_id: Option<String>,
    pub in_reply_to_id: Option<TweetId>,
    pub in_reply_to_author_id: Option<String>,
    pub referenced: Vec<Reference>,
    pub mentions: BTreeSet<String>,
    pub metrics: Metrics,
    pub author: AuthorSnapshot,
    pub source: SourceTag,
}

impl Candidate {
    pub fn is_reply(&self) -> bool {
        self.references(ReferenceKind::RepliedTo)
    }

    pub fn is_quote(&self) -> bool {
        self.references(ReferenceKind::Quoted)
    }

    /// Structural retweet, or the legacy `RT @user:` text form.
    pub fn is_retweet(&self) -> bool {
        self.references(ReferenceKind::Retweeted) || self.text.starts_with("RT ")
    }

    fn references(&self, kind: ReferenceKind) -> bool {
        self.referenced.iter().any(|r| r.kind == kind)
    }

    /// Id of the post this one replies to, from the reference list first.
    pub fn parent_id(&self) -> Option<&TweetId> {
        self.referenced
            .iter()
            .find(|r| r.kind == ReferenceKind::RepliedTo)
            .map(|r| &r.id)
            .or(self.in_reply_to_id.as_ref())
    }

    /// Calendar month bucket used for per-author caps.
    pub fn month(&self) -> MonthKey {
        MonthKey::of(&self.created_at)
    }
}

/// A calendar month (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(ts: &DateTime<Utc>) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    /// Parse `YYYY-MM`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (y, m) = raw.trim().split_once('-')?;
        let year = y.parse().ok()?;
        let month = m.parse().ok()?;
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// English month name, e.g. `March`.
    pub fn name(&self) -> &'static str {
        const NAMES: [&str; 12] = [
            "January", "February", "March", "April", "May", "June", "July", "August",
            "September", "October", "November", "December",
        ];
        NAMES[(self.month - 1) as usize]
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// --- Scoring outcome ---

/// Why a record does not earn formula points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disqualification {
    Duplicate,
    NonQualifyingSource,
    Unavailable,
    SuspendedAuthor,
    MultipleLinks,
    RedFlag,
    OverQuota,
    IsReply,
    Unrelated,
}

impl Disqualification {
    pub const ALL: [Disqualification; 9] = [
        Disqualification::Duplicate,
        Disqualification::NonQualifyingSource,
        Disqualification::Unavailable,
        Disqualification::SuspendedAuthor,
        Disqualification::MultipleLinks,
        Disqualification::RedFlag,
        Disqualification::OverQuota,
        Disqualification::IsReply,
        Disqualification::Unrelated,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Disqualification::Duplicate => "duplicate",
            Disqualification::NonQualifyingSource => "non_qualifying_source",
            Disqualification::Unavailable => "unavailable",
            Disqualification::SuspendedAuthor => "suspended_author",
            Disqualification::MultipleLinks => "multiple_links",
            Disqualification::RedFlag => "red_flag",
            Disqualification::OverQuota => "over_quota",
            Disqualification::IsReply => "is_reply",
            Disqualification::Unrelated => "unrelated",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.code() == code)
    }

    /// Flags recomputed from the data on every rescore. The rest are set by
    /// an operator and survive rescoring.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Disqualification::Duplicate
                | Disqualification::Unavailable
                | Disqualification::SuspendedAuthor
                | Disqualification::OverQuota
        )
    }
}

/// The points cell of a scored record.
///
/// Replaces the mix of blank strings and NaN the spreadsheet used to carry:
/// each meaning gets its own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Points {
    /// Computed from the formula.
    Scored(u64),
    /// Disqualified, shown as zero.
    Zeroed,
    /// Disqualified, intentionally left blank.
    Blank,
    /// The inputs needed by the formula could not be determined.
    Unavailable,
}

impl Points {
    /// Value used when ranking; anything not scored ranks as zero.
    pub fn value(&self) -> u64 {
        match self {
            Points::Scored(n) => *n,
            _ => 0,
        }
    }

    pub fn is_scored(&self) -> bool {
        matches!(self, Points::Scored(_))
    }
}

/// A candidate that survived filtering, with its derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub candidate: Candidate,
    pub follower_points: Option<u64>,
    pub engagement_points: Option<u64>,
    pub points: Points,
    pub disqualifications: BTreeSet<Disqualification>,
    pub discounted_mentions: BTreeSet<String>,
}

impl ScoredRecord {
    /// A record that has not been through the scoring engine yet.
    pub fn unscored(candidate: Candidate, discounted_mentions: BTreeSet<String>) -> Self {
        Self {
            candidate,
            follower_points: None,
            engagement_points: None,
            points: Points::Unavailable,
            disqualifications: BTreeSet::new(),
            discounted_mentions,
        }
    }

    pub fn id(&self) -> &TweetId {
        &self.candidate.id
    }
}
