//! Audit trail for everything the pipeline throws away.
//!
//! Regex rejects go to a JSON document keyed by filter name, replaced on every
//! run, and to one CSV per filter that accumulates across runs. Mention
//! discards accumulate in their own CSV. The CSVs are deduplicated by id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};

use tally_common::{Candidate, TweetId};

use crate::classifier::Discarded;
use crate::files::write_atomic;
use crate::tabular::{append_dedup, col, fmt_datetime, fmt_opt, Cells, Column, TableRow};

use crate::tabular::ColumnType::{Datetime, String as Str};

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub id: TweetId,
    pub created_at: DateTime<Utc>,
    pub author_id: String,
    pub user: Option<String>,
    pub source: String,
    pub reason: String,
    pub text: String,
}

impl AuditRow {
    pub fn new(candidate: &Candidate, reason: &str) -> Self {
        Self {
            id: candidate.id.clone(),
            created_at: candidate.created_at,
            author_id: candidate.author_id.clone(),
            user: candidate.author.handle.clone(),
            source: candidate.source.as_str().to_string(),
            reason: reason.to_string(),
            text: candidate.text.clone(),
        }
    }
}

impl TableRow for AuditRow {
    const COLUMNS: &'static [Column] = &[
        col("id", Str),
        col("created_at", Datetime),
        col("author_id", Str),
        col("user", Str),
        col("source", Str),
        col("reason", Str),
        col("text", Str),
    ];

    fn key(&self) -> String {
        self.id.to_string()
    }

    fn to_cells(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            fmt_datetime(&self.created_at),
            self.author_id.clone(),
            fmt_opt(&self.user),
            self.source.clone(),
            self.reason.clone(),
            self.text.clone(),
        ]
    }

    fn from_cells(cells: &Cells<'_>) -> Result<Self> {
        Ok(Self {
            id: cells.id("id")?,
            created_at: cells.datetime("created_at")?,
            author_id: cells.string("author_id")?,
            user: cells.opt_string("user")?,
            source: cells.string("source")?,
            reason: cells.string("reason")?,
            text: cells.string("text")?,
        })
    }
}

pub struct AuditTrail {
    discarded: PathBuf,
    discarded_mentions: PathBuf,
}

impl AuditTrail {
    pub fn new(discarded: impl Into<PathBuf>, discarded_mentions: impl Into<PathBuf>) -> Self {
        Self {
            discarded: discarded.into(),
            discarded_mentions: discarded_mentions.into(),
        }
    }

    /// `<dir>/<stem>_<filter>.csv` next to the per-run JSON document.
    pub fn filter_table_path(&self, filter: &str) -> PathBuf {
        let stem = self
            .discarded
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "discarded".to_string());
        self.discarded
            .with_file_name(format!("{stem}_{filter}.csv"))
    }

    pub fn mention_table_path(&self) -> &Path {
        &self.discarded_mentions
    }

    /// Replace the per-run document with this run's rejects and append them to
    /// the per-filter tables.
    pub fn record_filter_rejects(&self, rejected: &[(String, Vec<Candidate>)]) -> Result<usize> {
        let doc: BTreeMap<&str, &Vec<Candidate>> =
            rejected.iter().map(|(name, c)| (name.as_str(), c)).collect();
        write_atomic(&self.discarded, &serde_json::to_vec_pretty(&doc)?)?;
        self.append_filter_rejects(rejected)
    }

    /// Append to the per-filter tables without touching the per-run document.
    pub fn append_filter_rejects(&self, rejected: &[(String, Vec<Candidate>)]) -> Result<usize> {
        let mut added = 0;
        for (name, candidates) in rejected {
            if candidates.is_empty() {
                continue;
            }
            let rows = candidates.iter().map(|c| AuditRow::new(c, name)).collect();
            added += append_dedup(&self.filter_table_path(name), rows)?;
        }
        Ok(added)
    }

    pub fn record_mention_discards(&self, discarded: &[Discarded]) -> Result<usize> {
        if discarded.is_empty() {
            return Ok(0);
        }
        let rows = discarded
            .iter()
            .map(|d| AuditRow::new(&d.candidate, d.reason.code()))
            .collect();
        append_dedup(&self.discarded_mentions, rows)
    }
}
