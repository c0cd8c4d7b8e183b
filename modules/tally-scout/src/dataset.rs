//! The persisted dataset: one typed row per scored record.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;

use tally_common::{
    AuthorSnapshot, Candidate, Disqualification, Metrics, Points, Reference, ReferenceKind,
    ScoredRecord, SourceTag,
};

use crate::tabular::{
    col, fmt_datetime, fmt_opt, read_table, write_table, Cells, Column, TableRow,
};

use crate::tabular::ColumnType::{Datetime, Int, String as Str};

const COLUMNS: &[Column] = &[
    col("month", Str),
    col("created_at", Datetime),
    col("id", Str),
    col("conversation_id", Str),
    col("author_id", Str),
    col("user", Str),
    col("points", Int),
    col("points_status", Str),
    col("follower_points", Int),
    col("engagement_points", Int),
    col("disqualifications", Str),
    col("impression_count", Int),
    col("reply_count", Int),
    col("retweet_count", Int),
    col("like_count", Int),
    col("quote_count", Int),
    col("followers_count", Int),
    col("following_count", Int),
    col("tweet_count", Int),
    col("listed_count", Int),
    col("referenced_tweets", Str),
    col("text", Str),
    col("in_reply_to_id", Str),
    col("in_reply_to_user_id", Str),
    col("mentions", Str),
    col("discounted_mentions", Str),
    col("source", Str),
];

fn points_cells(points: &Points) -> (String, &'static str) {
    match points {
        Points::Scored(n) => (n.to_string(), "scored"),
        Points::Zeroed => ("0".to_string(), "zeroed"),
        Points::Blank => (String::new(), "blank"),
        Points::Unavailable => (String::new(), "unavailable"),
    }
}

fn join<'a>(items: impl IntoIterator<Item = &'a str>, sep: &str) -> String {
    items.into_iter().collect::<Vec<_>>().join(sep)
}

impl TableRow for ScoredRecord {
    const COLUMNS: &'static [Column] = COLUMNS;

    fn key(&self) -> String {
        self.id().to_string()
    }

    fn to_cells(&self) -> Vec<String> {
        let c = &self.candidate;
        let (points, status) = points_cells(&self.points);
        vec![
            c.month().to_string(),
            fmt_datetime(&c.created_at),
            c.id.to_string(),
            fmt_opt(&c.conversation_id),
            c.author_id.clone(),
            fmt_opt(&c.author.handle),
            points,
            status.to_string(),
            fmt_opt(&self.follower_points),
            fmt_opt(&self.engagement_points),
            join(self.disqualifications.iter().map(|d| d.code()), "|"),
            fmt_opt(&c.metrics.impressions),
            fmt_opt(&c.metrics.replies),
            fmt_opt(&c.metrics.retweets),
            fmt_opt(&c.metrics.likes),
            fmt_opt(&c.metrics.quotes),
            fmt_opt(&c.author.followers),
            fmt_opt(&c.author.following),
            fmt_opt(&c.author.posts),
            fmt_opt(&c.author.listed),
            c.referenced
                .iter()
                .map(|r| format!("{}:{}", r.kind.as_str(), r.id))
                .collect::<Vec<_>>()
                .join(";"),
            c.text.clone(),
            fmt_opt(&c.in_reply_to_id),
            fmt_opt(&c.in_reply_to_author_id),
            join(c.mentions.iter().map(String::as_str), ";"),
            join(self.discounted_mentions.iter().map(String::as_str), ";"),
            c.source.as_str().to_string(),
        ]
    }

    fn from_cells(cells: &Cells<'_>) -> Result<Self> {
        let mut referenced = Vec::new();
        for item in cells.list("referenced_tweets", ';')? {
            let parsed = item.split_once(':').and_then(|(kind, id)| {
                Some(Reference {
                    kind: ReferenceKind::parse(kind)?,
                    id: tally_common::TweetId::parse(id).ok()?,
                })
            });
            referenced.push(parsed.ok_or_else(|| {
                cells.invalid("referenced_tweets", format!("bad reference {item:?}"))
            })?);
        }

        let mut disqualifications = BTreeSet::new();
        for code in cells.list("disqualifications", '|')? {
            let flag = Disqualification::parse(code).ok_or_else(|| {
                cells.invalid("disqualifications", format!("unknown flag {code:?}"))
            })?;
            disqualifications.insert(flag);
        }

        let source = cells.raw("source")?;
        let source = SourceTag::parse(source)
            .ok_or_else(|| cells.invalid("source", format!("unknown source {source:?}")))?;

        let points = match cells.raw("points_status")? {
            "scored" => Points::Scored(
                cells
                    .opt_u64("points")?
                    .ok_or_else(|| cells.invalid("points", "scored row without points"))?,
            ),
            "zeroed" => Points::Zeroed,
            "blank" => Points::Blank,
            "unavailable" => Points::Unavailable,
            other => return Err(cells.invalid("points_status", format!("unknown status {other:?}"))),
        };

        let set = |column: &str| -> Result<BTreeSet<String>> {
            Ok(cells.list(column, ';')?.into_iter().map(str::to_string).collect())
        };

        let candidate = Candidate {
            id: cells.id("id")?,
            author_id: cells.string("author_id")?,
            text: cells.string("text")?,
            created_at: cells.datetime("created_at")?,
            conversation_id: cells.opt_string("conversation_id")?,
            in_reply_to_id: cells.opt_id("in_reply_to_id")?,
            in_reply_to_author_id: cells.opt_string("in_reply_to_user_id")?,
            referenced,
            mentions: set("mentions")?,
            metrics: Metrics {
                impressions: cells.opt_u64("impression_count")?,
                replies: cells.opt_u64("reply_count")?,
                retweets: cells.opt_u64("retweet_count")?,
                likes: cells.opt_u64("like_count")?,
                quotes: cells.opt_u64("quote_count")?,
            },
            author: AuthorSnapshot {
                handle: cells.opt_string("user")?,
                followers: cells.opt_u64("followers_count")?,
                following: cells.opt_u64("following_count")?,
                posts: cells.opt_u64("tweet_count")?,
                listed: cells.opt_u64("listed_count")?,
            },
            source,
        };

        Ok(ScoredRecord {
            candidate,
            follower_points: cells.opt_u64("follower_points")?,
            engagement_points: cells.opt_u64("engagement_points")?,
            points,
            disqualifications,
            discounted_mentions: set("discounted_mentions")?,
        })
    }
}

pub fn load_dataset(path: &Path) -> Result<Vec<ScoredRecord>> {
    let rows: Vec<ScoredRecord> = read_table(path)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Dataset loaded");
    Ok(rows)
}

pub fn save_dataset(path: &Path, rows: &[ScoredRecord]) -> Result<()> {
    write_table(path, rows)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Dataset saved");
    Ok(())
}
