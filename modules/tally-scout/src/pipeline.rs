//! One ingestion run, end to end.
//!
//! cutoffs -> fetch (mentions, target timeline, quotes) -> regex filters ->
//! mention classifier -> score -> merge -> rescore -> save -> advance cutoffs.
//!
//! Cutoffs only move after the dataset has been written, and only for
//! categories that ran to exhaustion. A run with deferred replies moves none.

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use tally_common::{FileConfig, ScoredRecord, TallyError, TweetId};

use crate::audit::AuditTrail;
use crate::backup::PageArchive;
use crate::classifier::MentionClassifier;
use crate::cutoff::{CutoffTracker, MENTIONS_KEY, TARGET_POSTS_KEY};
use crate::dataset::{load_dataset, save_dataset};
use crate::fetcher::{FetchCategory, FetchWindow, Fetcher, TerminalStatus};
use crate::filters::FilterChain;
use crate::memo::MemoStore;
use crate::merge::merge;
use crate::rescore::rescore;
use crate::stats::RunStats;
use crate::traits::TweetSource;

/// Operator overrides for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Start ids keyed by category label (`mentions`, `target_posts`),
    /// replacing the stored cutoff for that category.
    pub since_ids: BTreeMap<String, TweetId>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RunOptions {
    fn window(&self, category: &FetchCategory, stored: Option<&TweetId>) -> FetchWindow {
        FetchWindow {
            since_id: self
                .since_ids
                .get(&category.label())
                .or(stored)
                .cloned(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }

    fn validate(&self) -> Result<(), TallyError> {
        let known = [
            FetchCategory::Mentions.label(),
            FetchCategory::TargetPosts.label(),
        ];
        for key in self.since_ids.keys() {
            if !known.contains(key) {
                return Err(TallyError::Config(format!(
                    "unknown category {key:?} for --since-id (expected one of {})",
                    known.join(", ")
                )));
            }
        }
        Ok(())
    }
}

pub struct Pipeline<'a, S: TweetSource + ?Sized> {
    config: &'a FileConfig,
    source: &'a S,
}

impl<'a, S: TweetSource + ?Sized> Pipeline<'a, S> {
    pub fn new(config: &'a FileConfig, source: &'a S) -> Self {
        Self { config, source }
    }

    fn fetcher(&self) -> Fetcher<'a, S> {
        Fetcher::new(self.source, self.config.target.user_id.clone(), &self.config.fetch)
    }

    pub async fn run(&self, options: &RunOptions) -> Result<RunStats> {
        let run_id = Uuid::new_v4();
        self.run_inner(run_id, options)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_inner(&self, run_id: Uuid, options: &RunOptions) -> Result<RunStats> {
        options.validate()?;
        let paths = &self.config.paths;
        let mut stats = RunStats {
            run_id,
            ..Default::default()
        };
        info!(target_user = self.config.target.user_id.as_str(), "Run starting");

        let mut cutoffs = CutoffTracker::load(&paths.cutoffs())?;
        let backup = cutoffs.snapshot()?;
        info!(backup = %backup.display(), "Cutoffs snapshotted");

        let mut memo = MemoStore::load(&paths.memo())?;
        let chain = FilterChain::from_specs(&self.config.filters)?;
        let classifier = MentionClassifier::new(
            self.config.target.user_id.clone(),
            &self.config.target.handle,
            Box::new(self.config.classifier.mention_diff),
        );
        let audit = AuditTrail::new(paths.discarded(), paths.discarded_mentions());
        let fetcher = self.fetcher().with_archive(PageArchive::new(paths.backups()));

        // --- Fetch ---

        let mentions_window = options.window(&FetchCategory::Mentions, cutoffs.get(MENTIONS_KEY));
        let mentions = fetcher
            .fetch(&FetchCategory::Mentions, &mentions_window, &mut memo)
            .await?;

        let posts_window =
            options.window(&FetchCategory::TargetPosts, cutoffs.get(TARGET_POSTS_KEY));
        let sweep = fetcher.quotes_of_target(&posts_window, &mut memo).await?;

        stats.mentions_fetched = mentions.candidates.len();
        stats.target_posts_fetched = sweep.target_posts.candidates.len();
        stats.quotes_fetched = sweep.quotes.len();
        stats.rate_limited = mentions.status == TerminalStatus::RateLimited
            || sweep.status == TerminalStatus::RateLimited;

        let mut seen = HashSet::new();
        let candidates: Vec<_> = mentions
            .candidates
            .iter()
            .chain(sweep.quotes.iter())
            .filter(|c| seen.insert(c.id.clone()))
            .cloned()
            .collect();
        stats.candidates = candidates.len();

        // --- Filter and classify ---

        let filtered = chain.apply(candidates);
        audit.record_filter_rejects(&filtered.rejected)?;
        stats.rejected_by_filter = filtered
            .rejected
            .iter()
            .map(|(name, c)| (name.clone(), c.len()))
            .collect();

        let parent_ids = classifier.parents_needed(&filtered.survivors);
        let parents = fetcher.resolve_parents(&parent_ids, &mut memo).await?;
        let classified = classifier.classify(filtered.survivors, &parents);
        audit.record_mention_discards(&classified.discarded)?;
        stats.mention_discards = classified.discarded.len();
        stats.deferred = classified.deferred.len();
        stats.kept = classified.kept.len();

        // --- Score and merge ---

        let mut new_records: Vec<ScoredRecord> = classified
            .kept
            .into_iter()
            .map(|k| ScoredRecord::unscored(k.candidate, k.discounted))
            .collect();
        rescore(&mut new_records, &self.config.scoring);

        let dataset_path = paths.dataset();
        let existing = load_dataset(&dataset_path)?;
        let mut merged = merge(existing, new_records)?;
        let summary = rescore(&mut merged, &self.config.scoring);
        save_dataset(&dataset_path, &merged)
            .with_context(|| format!("Failed to save dataset {}", dataset_path.display()))?;

        stats.dataset_rows = merged.len();
        stats.scored = summary.scored;
        stats.unavailable = summary.unavailable;
        stats.capped = summary.capped;

        // --- Advance cutoffs ---

        if classified.deferred.is_empty() {
            let advances = [
                (MENTIONS_KEY, mentions.status, mentions.newest_id()),
                (
                    TARGET_POSTS_KEY,
                    sweep.status,
                    sweep.target_posts.newest_id(),
                ),
            ];
            for (key, status, newest) in advances {
                match (status, newest) {
                    (TerminalStatus::Exhausted, Some(id)) => {
                        if cutoffs.advance(key, id) {
                            stats.cutoffs_advanced.push((key.to_string(), id.clone()));
                        }
                    }
                    (TerminalStatus::RateLimited, _) => {
                        warn!(key, "Category rate limited, cutoff left in place");
                    }
                    _ => {}
                }
            }
            cutoffs.save()?;
        } else {
            warn!(
                deferred = classified.deferred.len(),
                "Replies deferred, no cutoff advanced"
            );
        }

        memo.save()?;
        info!(
            rows = stats.dataset_rows,
            kept = stats.kept,
            rate_limited = stats.rate_limited,
            "Run finished"
        );
        Ok(stats)
    }

    /// Re-look-up every post in the memo, replacing entries and tombstoning
    /// vanished ones. Stops early on rate limit and saves what it has.
    pub async fn refresh_memo(&self) -> Result<MemoRefresh> {
        let mut memo = MemoStore::load(&self.config.paths.memo())?;
        let ids = memo.post_ids();
        let outcome = self.fetcher().lookup(&ids, &mut memo).await?;
        memo.save()?;

        let refresh = MemoRefresh {
            requested: ids.len(),
            refreshed: outcome.found.len(),
            tombstoned: outcome.missing.len(),
            unresolved: outcome.unresolved.len(),
        };
        info!(
            requested = refresh.requested,
            refreshed = refresh.refreshed,
            tombstoned = refresh.tombstoned,
            unresolved = refresh.unresolved,
            "Memo refreshed"
        );
        Ok(refresh)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoRefresh {
    pub requested: usize,
    pub refreshed: usize,
    pub tombstoned: usize,
    pub unresolved: usize,
}

impl std::fmt::Display for MemoRefresh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Memo Refresh Complete ===")?;
        writeln!(f, "Posts requested:  {}", self.requested)?;
        writeln!(f, "Refreshed:        {}", self.refreshed)?;
        writeln!(f, "Tombstoned:       {}", self.tombstoned)?;
        writeln!(f, "Left for later:   {}", self.unresolved)?;
        Ok(())
    }
}
