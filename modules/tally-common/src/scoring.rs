//! Points formulas and disqualification rules.
//!
//! Everything here is pure: no I/O, total over all non-negative inputs.
//! Fractional results are rounded half away from zero (`f64::round`).

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;

use crate::types::{Candidate, Disqualification, MonthKey, Points, ScoredRecord};

/// Minimum follower count for view-based points.
pub const MIN_FOLLOWERS_FOR_VIEWS: u64 = 11;
/// Minimum impression count for view-based points.
pub const MIN_IMPRESSIONS_FOR_VIEWS: u64 = 50;
/// Default number of scored entries per author per calendar month.
pub const DEFAULT_MONTHLY_CAP: usize = 5;

fn round_points(x: f64) -> u64 {
    if !x.is_finite() || x <= 0.0 {
        return 0;
    }
    x.round() as u64
}

/// `0.1 · followers^(1/1.6)`
pub fn follower_points(followers: u64) -> u64 {
    round_points(0.1 * (followers as f64).powf(1.0 / 1.6))
}

/// `3.5 · (retweets + quotes)^(1/1.2)`
pub fn engagement_points(retweets: u64, quotes: u64) -> u64 {
    let shares = retweets.saturating_add(quotes) as f64;
    round_points(3.5 * shares.powf(1.0 / 1.2))
}

pub fn total_points(followers: u64, retweets: u64, quotes: u64) -> u64 {
    follower_points(followers) + engagement_points(retweets, quotes)
}

/// `0.45 · impressions^(1/1.6)`, zero for small accounts or barely-seen posts.
pub fn points_by_impressions(followers: u64, impressions: u64) -> u64 {
    if followers < MIN_FOLLOWERS_FOR_VIEWS || impressions < MIN_IMPRESSIONS_FOR_VIEWS {
        return 0;
    }
    round_points(0.45 * (impressions as f64).powf(1.0 / 1.6))
}

// --- Rules ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Follower points plus retweet/quote points.
    #[default]
    Engagement,
    /// View-based points.
    Impressions,
}

/// How to show a record whose only disqualification is a non-qualifying source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonQualifyingPolicy {
    #[default]
    Zero,
    Blank,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringRules {
    #[serde(default)]
    pub mode: ScoringMode,
    #[serde(default)]
    pub non_qualifying_source: NonQualifyingPolicy,
    #[serde(default = "default_monthly_cap")]
    pub monthly_cap: usize,
}

fn default_monthly_cap() -> usize {
    DEFAULT_MONTHLY_CAP
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            mode: ScoringMode::default(),
            non_qualifying_source: NonQualifyingPolicy::default(),
            monthly_cap: DEFAULT_MONTHLY_CAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub follower_points: Option<u64>,
    pub engagement_points: Option<u64>,
    pub points: Points,
}

/// Flags that follow from missing inputs: an unresolvable author, or metrics
/// the active mode needs but could not be read.
pub fn input_flags(candidate: &Candidate, mode: ScoringMode) -> BTreeSet<Disqualification> {
    let mut flags = BTreeSet::new();
    if !candidate.author.is_resolved() {
        flags.insert(Disqualification::SuspendedAuthor);
    }
    let m = &candidate.metrics;
    let metrics_missing = match mode {
        ScoringMode::Engagement => m.retweets.is_none() || m.quotes.is_none(),
        ScoringMode::Impressions => m.impressions.is_none(),
    };
    if metrics_missing {
        flags.insert(Disqualification::Unavailable);
    }
    flags
}

/// Score one candidate given its disqualification flags.
pub fn score(
    candidate: &Candidate,
    flags: &BTreeSet<Disqualification>,
    rules: &ScoringRules,
) -> ScoreBreakdown {
    if !flags.is_empty() {
        let only = |d: Disqualification| flags.len() == 1 && flags.contains(&d);
        let points = if only(Disqualification::NonQualifyingSource)
            && rules.non_qualifying_source == NonQualifyingPolicy::Blank
        {
            Points::Blank
        } else if only(Disqualification::Unavailable) {
            Points::Unavailable
        } else {
            Points::Zeroed
        };
        return ScoreBreakdown {
            follower_points: None,
            engagement_points: None,
            points,
        };
    }

    let followers = candidate.author.followers;
    let m = &candidate.metrics;
    match rules.mode {
        ScoringMode::Engagement => match (followers, m.retweets, m.quotes) {
            (Some(f), Some(rt), Some(q)) => {
                let fp = follower_points(f);
                let ep = engagement_points(rt, q);
                ScoreBreakdown {
                    follower_points: Some(fp),
                    engagement_points: Some(ep),
                    points: Points::Scored(fp + ep),
                }
            }
            _ => unavailable(),
        },
        ScoringMode::Impressions => match (followers, m.impressions) {
            (Some(f), Some(views)) => ScoreBreakdown {
                follower_points: None,
                engagement_points: None,
                points: Points::Scored(points_by_impressions(f, views)),
            },
            _ => unavailable(),
        },
    }
}

fn unavailable() -> ScoreBreakdown {
    ScoreBreakdown {
        follower_points: None,
        engagement_points: None,
        points: Points::Unavailable,
    }
}

/// Keep at most `cap` scored entries per author per calendar month.
///
/// Within each (author, month) group, scored records are ranked by descending
/// points; ties keep slice order. Everything past the cap is flagged
/// `over_quota` and zeroed. Returns how many records were capped.
pub fn apply_monthly_cap(records: &mut [ScoredRecord], cap: usize) -> usize {
    let mut groups: HashMap<(String, MonthKey), Vec<usize>> = HashMap::new();
    for (idx, rec) in records.iter().enumerate() {
        if rec.points.is_scored() {
            groups
                .entry((rec.candidate.author_id.clone(), rec.candidate.month()))
                .or_default()
                .push(idx);
        }
    }

    let mut capped = 0;
    for (_, mut indices) in groups {
        if indices.len() <= cap {
            continue;
        }
        // Stable: equal scores keep their row order.
        indices.sort_by(|a, b| records[*b].points.value().cmp(&records[*a].points.value()));
        for idx in indices.into_iter().skip(cap) {
            let rec = &mut records[idx];
            rec.disqualifications.insert(Disqualification::OverQuota);
            rec.points = Points::Zeroed;
            rec.follower_points = None;
            rec.engagement_points = None;
            capped += 1;
        }
    }
    capped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TweetId;
    use crate::types::{AuthorSnapshot, Metrics, SourceTag};
    use chrono::{TimeZone, Utc};

    fn candidate(id: &str, author: &str, day: u32) -> Candidate {
        Candidate {
            id: TweetId::parse(id).unwrap(),
            author_id: author.to_string(),
            text: "gm @target".into(),
            created_at: Utc.with_ymd_and_hms(2023, 3, day, 12, 0, 0).unwrap(),
            conversation_id: None,
            in_reply_to_id: None,
            in_reply_to_author_id: None,
            referenced: vec![],
            mentions: BTreeSet::new(),
            metrics: Metrics {
                impressions: Some(1000),
                replies: Some(0),
                retweets: Some(2),
                likes: Some(5),
                quotes: Some(1),
            },
            author: AuthorSnapshot {
                handle: Some(author.to_string()),
                followers: Some(500),
                following: Some(10),
                posts: Some(100),
                listed: Some(0),
            },
            source: SourceTag::Mentions,
        }
    }

    fn scored(id: &str, author: &str, day: u32, points: u64) -> ScoredRecord {
        let mut rec = ScoredRecord::unscored(candidate(id, author, day), BTreeSet::new());
        rec.points = Points::Scored(points);
        rec
    }

    #[test]
    fn zero_followers_earn_nothing() {
        assert_eq!(follower_points(0), 0);
        assert_eq!(engagement_points(0, 0), 0);
    }

    #[test]
    fn formulas_match_reference_values() {
        // 0.1 * 1000^(0.625) = 7.4989
        assert_eq!(follower_points(1000), 7);
        // 3.5 * 10^(0.8333) = 23.89
        assert_eq!(engagement_points(6, 4), 24);
        assert_eq!(total_points(1000, 6, 4), 31);
        // 0.45 * 1000^(0.625) = 33.74
        assert_eq!(points_by_impressions(50, 1000), 34);
    }

    #[test]
    fn impressions_thresholds_zero_the_score() {
        assert_eq!(points_by_impressions(10, 1000), 0);
        assert_eq!(points_by_impressions(50, 49), 0);
        assert!(points_by_impressions(11, 50) > 0);
    }

    #[test]
    fn any_flag_zeroes_the_score() {
        let c = candidate("1", "a", 1);
        let rules = ScoringRules::default();
        let flags = BTreeSet::from([Disqualification::Duplicate]);
        let s = score(&c, &flags, &rules);
        assert_eq!(s.points, Points::Zeroed);
        assert_eq!(s.follower_points, None);
    }

    #[test]
    fn non_qualifying_source_blank_policy() {
        let c = candidate("1", "a", 1);
        let flags = BTreeSet::from([Disqualification::NonQualifyingSource]);

        let zero = ScoringRules::default();
        assert_eq!(score(&c, &flags, &zero).points, Points::Zeroed);

        let blank = ScoringRules {
            non_qualifying_source: NonQualifyingPolicy::Blank,
            ..ScoringRules::default()
        };
        assert_eq!(score(&c, &flags, &blank).points, Points::Blank);

        // Blank only applies when it is the sole reason.
        let both = BTreeSet::from([
            Disqualification::NonQualifyingSource,
            Disqualification::RedFlag,
        ]);
        assert_eq!(score(&c, &both, &blank).points, Points::Zeroed);
    }

    #[test]
    fn missing_metrics_are_unavailable_not_zero() {
        let mut c = candidate("1", "a", 1);
        c.metrics = Metrics::unavailable();
        let flags = input_flags(&c, ScoringMode::Engagement);
        assert_eq!(flags, BTreeSet::from([Disqualification::Unavailable]));
        assert_eq!(
            score(&c, &flags, &ScoringRules::default()).points,
            Points::Unavailable
        );
    }

    #[test]
    fn unresolved_author_is_flagged_suspended() {
        let mut c = candidate("1", "a", 1);
        c.author = AuthorSnapshot::default();
        let flags = input_flags(&c, ScoringMode::Impressions);
        assert!(flags.contains(&Disqualification::SuspendedAuthor));
    }

    #[test]
    fn engagement_mode_sums_components() {
        let c = candidate("1", "a", 1);
        let s = score(&c, &BTreeSet::new(), &ScoringRules::default());
        assert_eq!(s.follower_points, Some(follower_points(500)));
        assert_eq!(s.engagement_points, Some(engagement_points(2, 1)));
        assert_eq!(s.points, Points::Scored(total_points(500, 2, 1)));
    }

    #[test]
    fn monthly_cap_flags_entries_past_the_fifth() {
        let mut records: Vec<ScoredRecord> = (0..7)
            .map(|i| scored(&format!("{}", 100 + i), "alice", 1 + i as u32, 70 - i * 10))
            .collect();

        let capped = apply_monthly_cap(&mut records, 5);

        assert_eq!(capped, 2);
        for rec in &records[..5] {
            assert!(rec.points.is_scored());
            assert!(!rec.disqualifications.contains(&Disqualification::OverQuota));
        }
        for rec in &records[5..] {
            assert_eq!(rec.points, Points::Zeroed);
            assert!(rec.disqualifications.contains(&Disqualification::OverQuota));
        }
    }

    #[test]
    fn monthly_cap_breaks_ties_by_row_order() {
        let mut records: Vec<ScoredRecord> =
            (0..3).map(|i| scored(&format!("{}", 10 + i), "bob", 2, 5)).collect();
        apply_monthly_cap(&mut records, 2);
        assert!(records[0].points.is_scored());
        assert!(records[1].points.is_scored());
        assert_eq!(records[2].points, Points::Zeroed);
    }

    #[test]
    fn monthly_cap_is_per_author_and_month() {
        let mut records = vec![
            scored("1", "alice", 1, 10),
            scored("2", "alice", 2, 9),
            scored("3", "bob", 3, 8),
        ];
        let mut april = scored("4", "alice", 4, 7);
        april.candidate.created_at = Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap();
        records.push(april);

        assert_eq!(apply_monthly_cap(&mut records, 1), 1);
        assert_eq!(records[1].points, Points::Zeroed);
        assert!(records[2].points.is_scored());
        assert!(records[3].points.is_scored());
    }
}
