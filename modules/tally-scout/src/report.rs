//! Monthly report: the dataset rows for one calendar month, optionally
//! refreshed against the platform, filtered, rescored and capped, written to
//! `<reports>/<Month YYYY> Tweet Data.csv`.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, warn};

use tally_common::{Candidate, FileConfig, Metrics, MonthKey, ScoredRecord, TweetId};

use crate::audit::AuditTrail;
use crate::classifier::strip_leading_mentions;
use crate::dataset::load_dataset;
use crate::fetcher::{candidate_from_post, Fetcher};
use crate::filters::FilterChain;
use crate::memo::MemoStore;
use crate::merge::ensure_unique;
use crate::rescore::{rescore, RescoreSummary};
use crate::tabular::write_table;
use crate::traits::TweetSource;

#[derive(Debug)]
pub struct ReportSummary {
    pub month: MonthKey,
    pub path: PathBuf,
    pub rows: usize,
    pub refreshed: usize,
    pub missing: usize,
    pub unresolved: usize,
    pub dropped_by_filter: usize,
    pub rescore: RescoreSummary,
}

impl std::fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Report {} {} ===", self.month.name(), self.month.year)?;
        writeln!(f, "Written to:       {}", self.path.display())?;
        writeln!(f, "Rows:             {}", self.rows)?;
        writeln!(f, "Refreshed:        {}", self.refreshed)?;
        writeln!(f, "No longer found:  {}", self.missing)?;
        writeln!(f, "Not refreshed:    {}", self.unresolved)?;
        writeln!(f, "Dropped by filter:{}", self.dropped_by_filter)?;
        writeln!(f, "Scored:           {}", self.rescore.scored)?;
        writeln!(f, "Over quota:       {}", self.rescore.capped)?;
        Ok(())
    }
}

pub fn report_file_name(month: &MonthKey) -> String {
    format!("{} {} Tweet Data.csv", month.name(), month.year)
}

pub async fn monthly_report<S: TweetSource + ?Sized>(
    config: &FileConfig,
    source: &S,
    month: MonthKey,
    refresh: bool,
) -> Result<ReportSummary> {
    let paths = &config.paths;
    let mut rows: Vec<ScoredRecord> = load_dataset(&paths.dataset())?
        .into_iter()
        .filter(|r| r.candidate.month() == month)
        .collect();
    ensure_unique(&rows, &format!("report selection for {month}"))?;
    info!(%month, rows = rows.len(), refresh, "Building monthly report");

    let mut summary = ReportSummary {
        month,
        path: paths.reports().join(report_file_name(&month)),
        rows: 0,
        refreshed: 0,
        missing: 0,
        unresolved: 0,
        dropped_by_filter: 0,
        rescore: RescoreSummary::default(),
    };

    if refresh {
        let mut memo = MemoStore::load(&paths.memo())?;
        let fetcher = Fetcher::new(source, config.target.user_id.clone(), &config.fetch);
        let ids: Vec<TweetId> = rows.iter().map(|r| r.id().clone()).collect();
        let outcome = fetcher.lookup(&ids, &mut memo).await?;

        let mut fresh: HashMap<String, Candidate> = HashMap::new();
        for post in &outcome.found {
            let Some(old) = rows.iter().find(|r| r.id().as_str() == post.id) else {
                continue;
            };
            let mut candidate = candidate_from_post(post, &memo, old.candidate.source)?;
            candidate.text = strip_leading_mentions(&candidate.text);
            fresh.insert(post.id.clone(), candidate);
        }
        for rec in rows.iter_mut() {
            if let Some(candidate) = fresh.remove(rec.id().as_str()) {
                rec.candidate = candidate;
            }
        }
        for id in &outcome.missing {
            if let Some(rec) = rows.iter_mut().find(|r| r.id() == id) {
                rec.candidate.metrics = Metrics::unavailable();
            }
        }
        if !outcome.unresolved.is_empty() {
            warn!(
                unresolved = outcome.unresolved.len(),
                "Rate limited during refresh, keeping stored values for the rest"
            );
        }
        memo.save()?;

        summary.refreshed = outcome.found.len();
        summary.missing = outcome.missing.len();
        summary.unresolved = outcome.unresolved.len();
    }

    let chain = FilterChain::from_specs(&config.filters)?;
    let mut rejected: HashMap<String, Vec<Candidate>> = HashMap::new();
    rows.retain(|rec| match chain.first_match(&rec.candidate.text) {
        Some(name) => {
            rejected
                .entry(name.to_string())
                .or_default()
                .push(rec.candidate.clone());
            false
        }
        None => true,
    });
    summary.dropped_by_filter = rejected.values().map(Vec::len).sum();
    if summary.dropped_by_filter > 0 {
        let audit = AuditTrail::new(paths.discarded(), paths.discarded_mentions());
        let rejected: Vec<(String, Vec<Candidate>)> = rejected.into_iter().collect();
        audit.append_filter_rejects(&rejected)?;
    }

    summary.rescore = rescore(&mut rows, &config.scoring);
    write_table(&summary.path, &rows)?;
    summary.rows = rows.len();

    info!(path = %summary.path.display(), rows = summary.rows, "Report written");
    Ok(summary)
}
