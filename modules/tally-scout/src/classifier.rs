//! Mention-discounting classifier.
//!
//! A reply deep in a thread often carries the target's handle only because an
//! ancestor mentioned it. This module separates genuine mentions from
//! inherited ones:
//!
//! 1. Leading `@handle` tokens are stripped from every candidate's stored text.
//! 2. Replies directly to the target are discarded.
//! 3. Quotes are kept with their full mention set.
//! 4. Other replies keep only the mentions that differ from their parent's
//!    (see [`MentionDiffPolicy`]) and are discarded if the target is not among
//!    them.
//! 5. Plain posts are kept iff they mention the target.
//!
//! Handles are compared case-insensitively, both to the target and to the
//! parent's mentions.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tally_common::config::MentionDiff;
use tally_common::{Candidate, TweetId};

// ---------------------------------------------------------------------------
// Mention policy
// ---------------------------------------------------------------------------

/// Set algebra deciding which of a reply's mentions are its own.
pub trait MentionDiffPolicy: Send + Sync {
    fn discount(&self, own: &BTreeSet<String>, parent: &BTreeSet<String>) -> BTreeSet<String>;
}

impl MentionDiffPolicy for MentionDiff {
    fn discount(&self, own: &BTreeSet<String>, parent: &BTreeSet<String>) -> BTreeSet<String> {
        match self {
            MentionDiff::SymmetricDifference => own.symmetric_difference(parent).cloned().collect(),
            MentionDiff::Subtraction => own.difference(parent).cloned().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// What is known about a reply's parent post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentMentions {
    Resolved(BTreeSet<String>),
    /// Deleted or otherwise gone; treated as mentioning no one.
    Missing,
    /// Not looked up because the rate-limit budget ran out.
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    ReplyToTarget,
    InheritedMention,
    NoTargetMention,
}

impl DiscardReason {
    pub fn code(&self) -> &'static str {
        match self {
            DiscardReason::ReplyToTarget => "reply_to_target",
            DiscardReason::InheritedMention => "inherited_mention",
            DiscardReason::NoTargetMention => "no_target_mention",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone)]
pub struct Kept {
    pub candidate: Candidate,
    pub discounted: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct Discarded {
    pub candidate: Candidate,
    pub reason: DiscardReason,
}

#[derive(Debug, Default)]
pub struct Classification {
    pub kept: Vec<Kept>,
    pub discarded: Vec<Discarded>,
    /// Replies whose parent could not be resolved this run.
    pub deferred: Vec<Candidate>,
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

pub struct MentionClassifier {
    target_user_id: String,
    target_handle: String,
    policy: Box<dyn MentionDiffPolicy>,
}

impl MentionClassifier {
    pub fn new(
        target_user_id: impl Into<String>,
        target_handle: &str,
        policy: Box<dyn MentionDiffPolicy>,
    ) -> Self {
        Self {
            target_user_id: target_user_id.into(),
            target_handle: target_handle.trim_start_matches('@').to_string(),
            policy,
        }
    }

    fn is_reply_to_target(&self, c: &Candidate) -> bool {
        c.in_reply_to_author_id.as_deref() == Some(self.target_user_id.as_str())
    }

    fn mentions_target(&self, handles: &BTreeSet<String>) -> bool {
        handles
            .iter()
            .any(|h| h.trim_start_matches('@').eq_ignore_ascii_case(&self.target_handle))
    }

    /// Parent ids that [`classify`](Self::classify) will need.
    pub fn parents_needed(&self, candidates: &[Candidate]) -> Vec<TweetId> {
        let mut ids: Vec<TweetId> = candidates
            .iter()
            .filter(|c| c.is_reply() && !c.is_quote() && !self.is_reply_to_target(c))
            .filter_map(|c| c.parent_id().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Classify `candidates`. A parent id absent from `parents` is treated
    /// as missing.
    pub fn classify(
        &self,
        candidates: Vec<Candidate>,
        parents: &HashMap<TweetId, ParentMentions>,
    ) -> Classification {
        let mut out = Classification::default();

        for mut candidate in candidates {
            candidate.text = strip_leading_mentions(&candidate.text);

            if self.is_reply_to_target(&candidate) {
                out.discarded.push(Discarded {
                    candidate,
                    reason: DiscardReason::ReplyToTarget,
                });
                continue;
            }

            if candidate.is_quote() {
                let discounted = candidate.mentions.clone();
                out.kept.push(Kept {
                    candidate,
                    discounted,
                });
                continue;
            }

            if candidate.is_reply() {
                let parent = candidate.parent_id().and_then(|id| parents.get(id));
                let empty = BTreeSet::new();
                let parent_mentions = match parent {
                    Some(ParentMentions::Resolved(set)) => set,
                    Some(ParentMentions::Unresolved) => {
                        out.deferred.push(candidate);
                        continue;
                    }
                    Some(ParentMentions::Missing) | None => &empty,
                };
                let parent_mentions = spelled_like(&candidate.mentions, parent_mentions);
                let discounted = self.policy.discount(&candidate.mentions, &parent_mentions);
                if self.mentions_target(&discounted) {
                    out.kept.push(Kept {
                        candidate,
                        discounted,
                    });
                } else {
                    out.discarded.push(Discarded {
                        candidate,
                        reason: DiscardReason::InheritedMention,
                    });
                }
                continue;
            }

            if self.mentions_target(&candidate.mentions) {
                let discounted = candidate.mentions.clone();
                out.kept.push(Kept {
                    candidate,
                    discounted,
                });
            } else {
                out.discarded.push(Discarded {
                    candidate,
                    reason: DiscardReason::NoTargetMention,
                });
            }
        }

        tracing::info!(
            kept = out.kept.len(),
            discarded = out.discarded.len(),
            deferred = out.deferred.len(),
            "Mentions classified"
        );
        out
    }
}

/// `parent` with each handle rewritten to the reply's spelling when the two
/// differ only in ASCII case, so the set algebra sees one handle.
fn spelled_like(own: &BTreeSet<String>, parent: &BTreeSet<String>) -> BTreeSet<String> {
    parent
        .iter()
        .map(|p| {
            own.iter()
                .find(|o| o.eq_ignore_ascii_case(p))
                .unwrap_or(p)
                .clone()
        })
        .collect()
}

/// Drop leading `@handle` tokens and the whitespace after each. Stops at the
/// first token with no separator after it.
pub fn strip_leading_mentions(text: &str) -> String {
    let mut rest = text;
    while rest.starts_with('@') {
        let Some(end) = rest.find(char::is_whitespace) else {
            break;
        };
        rest = rest[end..].trim_start();
    }
    rest.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tally_common::{AuthorSnapshot, Metrics, Reference, ReferenceKind, SourceTag};

    const TARGET_ID: &str = "1";

    fn id(s: &str) -> TweetId {
        TweetId::parse(s).unwrap()
    }

    fn set(handles: &[&str]) -> BTreeSet<String> {
        handles.iter().map(|h| h.to_string()).collect()
    }

    fn candidate(id_: &str, text: &str, mentions: &[&str]) -> Candidate {
        Candidate {
            id: id(id_),
            author_id: "9".to_string(),
            text: text.to_string(),
            created_at: Utc::now(),
            conversation_id: None,
            in_reply_to_id: None,
            in_reply_to_author_id: None,
            referenced: Vec::new(),
            mentions: set(mentions),
            metrics: Metrics::unavailable(),
            author: AuthorSnapshot::default(),
            source: SourceTag::Mentions,
        }
    }

    fn reply_to(mut c: Candidate, parent: &str, parent_author: &str) -> Candidate {
        c.referenced.push(Reference {
            kind: ReferenceKind::RepliedTo,
            id: id(parent),
        });
        c.in_reply_to_id = Some(id(parent));
        c.in_reply_to_author_id = Some(parent_author.to_string());
        c
    }

    fn classifier(policy: MentionDiff) -> MentionClassifier {
        MentionClassifier::new(TARGET_ID, "@JediSwap", Box::new(policy))
    }

    #[test]
    fn strips_only_leading_mentions() {
        assert_eq!(strip_leading_mentions("@a @b hello @c"), "hello @c");
        assert_eq!(strip_leading_mentions("@a\n@b\nhi"), "hi");
        assert_eq!(strip_leading_mentions("hello @a"), "hello @a");
        assert_eq!(strip_leading_mentions("@onlyhandle"), "@onlyhandle");
        assert_eq!(strip_leading_mentions("@a @onlyhandle"), "@onlyhandle");
    }

    #[test]
    fn inherited_mention_is_discarded() {
        // Parent mentions {JediSwap, alice}; the reply repeats both.
        let c = reply_to(
            candidate("20", "@JediSwap @alice agreed", &["JediSwap", "alice"]),
            "10",
            "77",
        );
        let parents = HashMap::from([(id("10"), ParentMentions::Resolved(set(&["JediSwap", "alice"])))]);

        let out = classifier(MentionDiff::SymmetricDifference).classify(vec![c], &parents);
        assert!(out.kept.is_empty());
        assert_eq!(out.discarded[0].reason, DiscardReason::InheritedMention);
        assert_eq!(out.discarded[0].candidate.text, "agreed");
    }

    #[test]
    fn new_target_mention_in_reply_is_kept() {
        let c = reply_to(
            candidate("20", "@alice look at @JediSwap", &["alice", "JediSwap"]),
            "10",
            "77",
        );
        let parents = HashMap::from([(id("10"), ParentMentions::Resolved(set(&["alice"])))]);

        let out = classifier(MentionDiff::SymmetricDifference).classify(vec![c], &parents);
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.kept[0].discounted, set(&["JediSwap"]));
    }

    #[test]
    fn policies_differ_on_parent_only_mentions() {
        let c = reply_to(candidate("20", "gm @JediSwap", &["JediSwap"]), "10", "77");
        let parents = HashMap::from([(id("10"), ParentMentions::Resolved(set(&["bob"])))]);

        let sym = classifier(MentionDiff::SymmetricDifference).classify(vec![c.clone()], &parents);
        assert_eq!(sym.kept[0].discounted, set(&["JediSwap", "bob"]));

        let sub = classifier(MentionDiff::Subtraction).classify(vec![c], &parents);
        assert_eq!(sub.kept[0].discounted, set(&["JediSwap"]));
    }

    #[test]
    fn reply_to_target_is_always_discarded() {
        let c = reply_to(candidate("20", "@JediSwap wow", &["JediSwap"]), "10", TARGET_ID);
        let out = classifier(MentionDiff::SymmetricDifference).classify(vec![c], &HashMap::new());
        assert_eq!(out.discarded[0].reason, DiscardReason::ReplyToTarget);
    }

    #[test]
    fn quote_keeps_all_mentions() {
        let mut c = candidate("20", "this", &["alice"]);
        c.referenced.push(Reference {
            kind: ReferenceKind::Quoted,
            id: id("10"),
        });
        let out = classifier(MentionDiff::SymmetricDifference).classify(vec![c], &HashMap::new());
        assert_eq!(out.kept[0].discounted, set(&["alice"]));
    }

    #[test]
    fn plain_post_needs_target_mention() {
        let yes = candidate("20", "hi @jediswap", &["jediswap"]);
        let no = candidate("21", "hi @alice", &["alice"]);
        let out =
            classifier(MentionDiff::SymmetricDifference).classify(vec![yes, no], &HashMap::new());
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.discarded[0].reason, DiscardReason::NoTargetMention);
    }

    #[test]
    fn inherited_mention_is_discarded_regardless_of_case() {
        let c = reply_to(
            candidate("20", "@jediswap agreed", &["jediswap"]),
            "10",
            "77",
        );
        let parents = HashMap::from([(id("10"), ParentMentions::Resolved(set(&["JediSwap"])))]);

        for policy in [MentionDiff::SymmetricDifference, MentionDiff::Subtraction] {
            let out = classifier(policy).classify(vec![c.clone()], &parents);
            assert!(out.kept.is_empty());
            assert_eq!(out.discarded[0].reason, DiscardReason::InheritedMention);
        }
    }

    #[test]
    fn genuine_mention_keeps_the_reply_spelling() {
        let c = reply_to(
            candidate("20", "@ALICE cc @JediSwap", &["ALICE", "JediSwap"]),
            "10",
            "77",
        );
        let parents = HashMap::from([(id("10"), ParentMentions::Resolved(set(&["alice"])))]);

        let out = classifier(MentionDiff::SymmetricDifference).classify(vec![c], &parents);
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.kept[0].discounted, set(&["JediSwap"]));
    }

    #[test]
    fn missing_parent_counts_as_empty_and_unresolved_defers() {
        let a = reply_to(candidate("20", "@JediSwap hi", &["JediSwap"]), "10", "77");
        let b = reply_to(candidate("21", "@JediSwap hi", &["JediSwap"]), "11", "77");
        let parents = HashMap::from([
            (id("10"), ParentMentions::Missing),
            (id("11"), ParentMentions::Unresolved),
        ]);
        let out = classifier(MentionDiff::SymmetricDifference).classify(vec![a, b], &parents);
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.deferred.len(), 1);
        assert_eq!(out.deferred[0].id, id("21"));
    }

    #[test]
    fn parents_needed_skips_quotes_and_replies_to_target() {
        let a = reply_to(candidate("20", "x", &[]), "10", "77");
        let b = reply_to(candidate("21", "x", &[]), "10", "78");
        let c = reply_to(candidate("22", "x", &[]), "11", TARGET_ID);
        let ids = classifier(MentionDiff::SymmetricDifference).parents_needed(&[a, b, c]);
        assert_eq!(ids, vec![id("10")]);
    }
}
