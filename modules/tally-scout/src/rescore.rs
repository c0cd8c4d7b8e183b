//! Whole-dataset rescoring.
//!
//! Derived flags (`duplicate`, `unavailable`, `suspended_author`,
//! `over_quota`) are cleared and recomputed from the rows; operator flags are
//! left alone. Rows are then scored and the monthly cap applied.

use std::collections::HashSet;

use tally_common::scoring::{apply_monthly_cap, input_flags, score, ScoringRules};
use tally_common::{Disqualification, ScoredRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescoreSummary {
    pub scored: usize,
    pub disqualified: usize,
    pub unavailable: usize,
    pub capped: usize,
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Rescore `records` in place. Duplicate detection walks rows in id order, so
/// the earliest post of a repeated text keeps its points.
pub fn rescore(records: &mut [ScoredRecord], rules: &ScoringRules) -> RescoreSummary {
    let mut order: Vec<usize> = (0..records.len()).collect();
    order.sort_by(|a, b| records[*a].id().cmp(records[*b].id()));

    let mut seen_texts = HashSet::new();
    for idx in order {
        let rec = &mut records[idx];
        rec.disqualifications.retain(|d| !d.is_derived());
        rec.disqualifications
            .extend(input_flags(&rec.candidate, rules.mode));

        let text = normalize(&rec.candidate.text);
        if !text.is_empty() && !seen_texts.insert((rec.candidate.author_id.clone(), text)) {
            rec.disqualifications.insert(Disqualification::Duplicate);
        }

        let breakdown = score(&rec.candidate, &rec.disqualifications, rules);
        rec.follower_points = breakdown.follower_points;
        rec.engagement_points = breakdown.engagement_points;
        rec.points = breakdown.points;
    }

    let capped = apply_monthly_cap(records, rules.monthly_cap);

    let mut summary = RescoreSummary {
        capped,
        ..Default::default()
    };
    for rec in records.iter() {
        if rec.points.is_scored() {
            summary.scored += 1;
        } else if rec.points == tally_common::Points::Unavailable {
            summary.unavailable += 1;
        } else {
            summary.disqualified += 1;
        }
    }
    tracing::info!(
        scored = summary.scored,
        disqualified = summary.disqualified,
        unavailable = summary.unavailable,
        capped = summary.capped,
        "Dataset rescored"
    );
    summary
}
