//! Reconciling new records with the persisted dataset.
//!
//! Records are concatenated, stably sorted by a freshness proxy (impressions,
//! with unknown counting as least fresh), and the last version of each id is
//! kept. Operator flags set on any replaced version carry over to the kept
//! one. The result is sorted by id so saved datasets diff cleanly.

use std::collections::{HashMap, HashSet};

use tally_common::{ScoredRecord, TallyError, TweetId};

/// Fail on the first id that appears twice in `records`.
pub fn ensure_unique(records: &[ScoredRecord], context: &str) -> Result<(), TallyError> {
    let mut seen = HashSet::new();
    for rec in records {
        if !seen.insert(rec.id()) {
            return Err(TallyError::DuplicateId {
                id: rec.id().clone(),
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

pub fn merge(
    existing: Vec<ScoredRecord>,
    new: Vec<ScoredRecord>,
) -> Result<Vec<ScoredRecord>, TallyError> {
    ensure_unique(&new, "new batch")?;

    let mut all = existing;
    all.extend(new);
    all.sort_by_key(|r| r.candidate.metrics.impressions);

    // Last occurrence wins: later entries overwrite the slot.
    let mut latest: HashMap<TweetId, ScoredRecord> = HashMap::with_capacity(all.len());
    for mut rec in all {
        if let Some(replaced) = latest.remove(rec.id()) {
            rec.disqualifications.extend(
                replaced
                    .disqualifications
                    .into_iter()
                    .filter(|d| !d.is_derived()),
            );
        }
        latest.insert(rec.id().clone(), rec);
    }

    let mut merged: Vec<ScoredRecord> = latest.into_values().collect();
    merged.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::Utc;
    use tally_common::{AuthorSnapshot, Candidate, Disqualification, Metrics, SourceTag};

    fn rec(id: &str, impressions: Option<u64>, text: &str) -> ScoredRecord {
        let candidate = Candidate {
            id: TweetId::parse(id).unwrap(),
            author_id: "9".to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            conversation_id: None,
            in_reply_to_id: None,
            in_reply_to_author_id: None,
            referenced: Vec::new(),
            mentions: BTreeSet::new(),
            metrics: Metrics {
                impressions,
                ..Metrics::unavailable()
            },
            author: AuthorSnapshot::default(),
            source: SourceTag::Mentions,
        };
        ScoredRecord::unscored(candidate, BTreeSet::new())
    }

    fn ids(records: &[ScoredRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id().as_str()).collect()
    }

    #[test]
    fn fresher_version_wins_and_output_is_sorted() {
        let existing = vec![rec("200", Some(50), "old"), rec("99", Some(10), "a")];
        let new = vec![rec("200", Some(80), "new"), rec("1000", None, "b")];
        let merged = merge(existing, new).unwrap();
        assert_eq!(ids(&merged), vec!["99", "200", "1000"]);
        assert_eq!(merged[1].candidate.text, "new");
    }

    #[test]
    fn unknown_impressions_lose_to_known() {
        let merged = merge(vec![rec("5", Some(3), "seen")], vec![rec("5", None, "blind")]).unwrap();
        assert_eq!(merged[0].candidate.text, "seen");
    }

    #[test]
    fn equal_freshness_keeps_the_later_record() {
        let merged = merge(vec![rec("5", Some(3), "old")], vec![rec("5", Some(3), "new")]).unwrap();
        assert_eq!(merged[0].candidate.text, "new");
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = vec![rec("1", Some(1), "a"), rec("2", Some(2), "b")];
        let new = vec![rec("2", Some(5), "b2"), rec("3", None, "c")];
        let once = merge(existing, new.clone()).unwrap();
        let twice = merge(once.clone(), new).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn operator_flags_survive_a_fresher_version() {
        let mut old = rec("5", Some(10), "old");
        old.disqualifications.insert(Disqualification::RedFlag);
        old.disqualifications.insert(Disqualification::OverQuota);
        let merged = merge(vec![old], vec![rec("5", Some(20), "new")]).unwrap();
        assert_eq!(merged[0].candidate.text, "new");
        assert_eq!(
            merged[0].disqualifications,
            BTreeSet::from([Disqualification::RedFlag])
        );
    }

    #[test]
    fn duplicate_in_new_batch_is_rejected() {
        let err = merge(Vec::new(), vec![rec("7", None, "a"), rec("7", None, "b")]).unwrap_err();
        assert!(matches!(err, TallyError::DuplicateId { .. }));
    }
}
