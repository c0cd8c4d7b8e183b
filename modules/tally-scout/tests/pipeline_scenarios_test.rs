//! End-to-end runs against a scripted source.

use std::path::Path;

use tally_common::config::FileConfig;
use tally_common::{Disqualification, MonthKey, Points, ScoredRecord, SourceTag, TallyError, TweetId};
use tally_scout::audit::AuditRow;
use tally_scout::cutoff::{CutoffTracker, MENTIONS_KEY, TARGET_POSTS_KEY};
use tally_scout::dataset::{load_dataset, save_dataset};
use tally_scout::pipeline::{Pipeline, RunOptions};
use tally_scout::report::{monthly_report, report_file_name};
use tally_scout::tabular::read_table;
use tally_scout::testing::{post, quote, reply, user, MockSource, TARGET_ID};
use x_client::{Tweet, User};

fn config(dir: &Path) -> FileConfig {
    let raw = format!(
        r#"
        [target]
        user_id = "{TARGET_ID}"
        handle = "JediSwap"

        [paths]
        data_dir = '{}'
        dataset = "dataset.csv"
        cutoffs = "last_queried.json"
        memo = "memo.json"
        discarded = "discarded_tweets.json"
        discarded_mentions = "discarded_mentions.csv"
        backups = "backups"
        reports = "reports"

        [fetch]
        cooldown_secs = 0
        rate_limit_retries = 1

        [[filters]]
        name = "more_than_5_mentions"
        pattern = '@\w+.?\s.*@\w+.?\s.*@\w+.?\s.*@\w+.?\s.*@\w+.?\s.*@\w+'
        flags = ["dotall"]

        [[filters]]
        name = "red_flag"
        pattern = "airdrop"
        flags = ["ignorecase"]

        [[filters]]
        name = "retweets"
        pattern = "^RT"
        "#,
        dir.display()
    );
    toml::from_str(&raw).unwrap()
}

fn id(s: &str) -> TweetId {
    TweetId::parse(s).unwrap()
}

fn seed_cutoff(dir: &Path, mention: &str) {
    std::fs::write(
        dir.join("last_queried.json"),
        format!(r#"{{"{MENTIONS_KEY}": "{mention}"}}"#),
    )
    .unwrap();
}

fn plain(n: u64) -> Tweet {
    post(&n.to_string(), &format!("u{n}"), &format!("@JediSwap gm from {n}"))
}

fn authors() -> Vec<User> {
    (1..=600)
        .map(|n| user(&format!("u{n}"), &format!("fan{n}"), 1000))
        .chain([user("77", "alice", 500)])
        .collect()
}

/// Parents looked up by the classifier.
fn parents() -> Vec<Tweet> {
    vec![
        post("50", "77", "@JediSwap @alice what do you think"),
        post("51", "u9", "@alice nice"),
    ]
}

/// 101..=150 with one retweet, one inherited mention, one reply to the
/// target and one genuine reply; the rest plain mentions.
fn first_page() -> Vec<Tweet> {
    let mut page = vec![
        post("101", "u101", "RT @JediSwap: launch"),
        reply("102", "u102", "@JediSwap @alice agreed", "50", "77"),
        reply("103", "u103", "@JediSwap thanks", "60", TARGET_ID),
        reply("104", "u104", "@alice cc @JediSwap", "51", "u9"),
    ];
    page.extend((105..=150).map(plain));
    page
}

fn second_page() -> Vec<Tweet> {
    (151..=200).map(plain).collect()
}

fn scripted() -> MockSource {
    MockSource::new()
        .with_users(authors())
        .with_posts(parents())
        .on_mentions(first_page(), Some("p2"))
        .on_mentions(second_page(), None)
}

fn ids(rows: &[ScoredRecord]) -> Vec<String> {
    rows.iter().map(|r| r.id().to_string()).collect()
}

#[tokio::test]
async fn full_run_filters_discounts_scores_and_advances_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    seed_cutoff(dir.path(), "100");
    let cfg = config(dir.path());
    let source = scripted();

    let stats = Pipeline::new(&cfg, &source)
        .run(&RunOptions::default())
        .await
        .unwrap();

    assert_eq!(stats.mentions_fetched, 100);
    assert_eq!(stats.kept, 97);
    assert_eq!(stats.mention_discards, 2);
    assert!(!stats.rate_limited);

    // since_id came from the stored cutoff.
    let first = &source.calls()[0];
    assert!(first.1.contains(&("since_id".to_string(), "100".to_string())));

    let rows = load_dataset(&dir.path().join("dataset.csv")).unwrap();
    assert_eq!(rows.len(), 97);
    let row_ids = ids(&rows);
    assert!(!row_ids.contains(&"101".to_string()), "retweet filtered");
    assert!(!row_ids.contains(&"102".to_string()), "inherited mention dropped");
    assert!(!row_ids.contains(&"103".to_string()), "reply to target dropped");
    assert!(row_ids.contains(&"104".to_string()), "genuine reply kept");

    let sorted = {
        let mut s: Vec<TweetId> = rows.iter().map(|r| r.id().clone()).collect();
        s.sort();
        s
    };
    assert_eq!(rows.iter().map(|r| r.id().clone()).collect::<Vec<_>>(), sorted);

    let genuine = rows.iter().find(|r| r.id().as_str() == "104").unwrap();
    assert_eq!(genuine.candidate.text, "cc @JediSwap");
    assert!(genuine.discounted_mentions.contains("JediSwap"));
    assert!(rows.iter().all(|r| r.points.is_scored()));

    let cutoffs = CutoffTracker::load(&dir.path().join("last_queried.json")).unwrap();
    assert_eq!(cutoffs.get(MENTIONS_KEY), Some(&id("200")));
    let backup = CutoffTracker::load(&dir.path().join("last_queriedBAK.txt")).unwrap();
    assert_eq!(backup.get(MENTIONS_KEY), Some(&id("100")));

    let retweets: Vec<AuditRow> =
        read_table(&dir.path().join("discarded_tweets_retweets.csv")).unwrap();
    assert_eq!(retweets.len(), 1);
    assert_eq!(retweets[0].id, id("101"));

    let discards: Vec<AuditRow> =
        read_table(&dir.path().join("discarded_mentions.csv")).unwrap();
    let reasons: Vec<&str> = discards.iter().map(|r| r.reason.as_str()).collect();
    assert!(reasons.contains(&"inherited_mention"));
    assert!(reasons.contains(&"reply_to_target"));

    let backups = std::fs::read_dir(dir.path().join("backups")).unwrap().count();
    assert_eq!(backups, 2);
}

#[tokio::test]
async fn rerunning_the_same_pages_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());

    Pipeline::new(&cfg, &scripted())
        .run(&RunOptions::default())
        .await
        .unwrap();
    let once = load_dataset(&dir.path().join("dataset.csv")).unwrap();

    Pipeline::new(&cfg, &scripted())
        .run(&RunOptions::default())
        .await
        .unwrap();
    let twice = load_dataset(&dir.path().join("dataset.csv")).unwrap();

    assert_eq!(once, twice);
    let unique: std::collections::HashSet<_> = twice.iter().map(|r| r.id().clone()).collect();
    assert_eq!(unique.len(), twice.len());
}

#[tokio::test]
async fn rate_limited_run_keeps_partial_results_and_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    seed_cutoff(dir.path(), "100");
    let cfg = config(dir.path());
    let source = MockSource::new()
        .with_users(authors())
        .with_posts(parents())
        .on_mentions(first_page(), Some("p2"))
        .rate_limit_mentions(2);

    let stats = Pipeline::new(&cfg, &source)
        .run(&RunOptions::default())
        .await
        .unwrap();

    assert!(stats.rate_limited);
    assert!(stats.to_string().contains("quota exhausted"));
    assert!(stats.cutoffs_advanced.is_empty());

    let rows = load_dataset(&dir.path().join("dataset.csv")).unwrap();
    assert_eq!(rows.len(), 47);
    let cutoffs = CutoffTracker::load(&dir.path().join("last_queried.json")).unwrap();
    assert_eq!(cutoffs.get(MENTIONS_KEY), Some(&id("100")));
}

#[tokio::test]
async fn unresolvable_parent_defers_and_holds_every_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    seed_cutoff(dir.path(), "100");
    let cfg = config(dir.path());
    let source = MockSource::new()
        .with_users(authors())
        .on_mentions(
            vec![reply("104", "u104", "@alice cc @JediSwap", "51", "u9"), plain(105)],
            None,
        )
        .on_user_tweets(vec![post("10", TARGET_ID, "launch day")], None)
        .rate_limit_lookups(2);

    let stats = Pipeline::new(&cfg, &source)
        .run(&RunOptions::default())
        .await
        .unwrap();

    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.kept, 1);
    assert!(stats.cutoffs_advanced.is_empty());

    let cutoffs = CutoffTracker::load(&dir.path().join("last_queried.json")).unwrap();
    assert_eq!(cutoffs.get(MENTIONS_KEY), Some(&id("100")));
    assert!(cutoffs.get(TARGET_POSTS_KEY).is_none());
}

#[tokio::test]
async fn quotes_of_target_posts_are_scored() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let source = MockSource::new()
        .with_users(authors())
        .on_user_tweets(vec![post("10", TARGET_ID, "launch day")], None)
        .on_quotes("10", vec![quote("500", "u5", "this is huge", "10")], None);

    let stats = Pipeline::new(&cfg, &source)
        .run(&RunOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.quotes_fetched, 1);

    let rows = load_dataset(&dir.path().join("dataset.csv")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].candidate.source, SourceTag::Quote);
    assert!(rows[0].points.is_scored());

    let cutoffs = CutoffTracker::load(&dir.path().join("last_queried.json")).unwrap();
    assert_eq!(cutoffs.get(TARGET_POSTS_KEY), Some(&id("10")));
}

#[tokio::test]
async fn time_window_overrides_stored_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    seed_cutoff(dir.path(), "100");
    let cfg = config(dir.path());
    let source = scripted();

    let options = RunOptions {
        start_time: Some("2023-02-01T00:00:00Z".parse().unwrap()),
        ..Default::default()
    };
    Pipeline::new(&cfg, &source).run(&options).await.unwrap();

    let first = &source.calls()[0];
    assert!(first.1.iter().any(|(k, _)| k == "start_time"));
    assert!(first.1.iter().all(|(k, _)| k != "since_id"));
}

#[tokio::test]
async fn backfill_keeps_operator_flags_on_refetched_rows() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let dataset = dir.path().join("dataset.csv");
    Pipeline::new(&cfg, &scripted())
        .run(&RunOptions::default())
        .await
        .unwrap();

    let mut rows = load_dataset(&dataset).unwrap();
    let flagged = rows.iter_mut().find(|r| r.id().as_str() == "150").unwrap();
    flagged.disqualifications.insert(Disqualification::RedFlag);
    save_dataset(&dataset, &rows).unwrap();

    let backfill = RunOptions {
        start_time: Some("2023-02-01T00:00:00Z".parse().unwrap()),
        ..Default::default()
    };
    Pipeline::new(&cfg, &scripted()).run(&backfill).await.unwrap();

    let rows = load_dataset(&dataset).unwrap();
    assert_eq!(rows.len(), 97);
    let flagged = rows.iter().find(|r| r.id().as_str() == "150").unwrap();
    assert!(flagged.disqualifications.contains(&Disqualification::RedFlag));
    assert_eq!(flagged.points, Points::Zeroed);
}

#[tokio::test]
async fn unknown_since_id_category_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let options = RunOptions {
        since_ids: [("likes".to_string(), id("5"))].into_iter().collect(),
        ..Default::default()
    };
    let err = Pipeline::new(&cfg, &MockSource::new())
        .run(&options)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TallyError>(),
        Some(TallyError::Config(_))
    ));
}

#[tokio::test]
async fn monthly_report_refreshes_and_marks_vanished_posts() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    Pipeline::new(&cfg, &scripted())
        .run(&RunOptions::default())
        .await
        .unwrap();

    // Everything still resolves except post 105.
    let alive: Vec<Tweet> = first_page()
        .into_iter()
        .chain(second_page())
        .filter(|p| p.id != "105")
        .collect();
    let refresher = MockSource::new().with_users(authors()).with_posts(alive);

    let month = MonthKey::parse("2023-02").unwrap();
    let summary = monthly_report(&cfg, &refresher, month, true).await.unwrap();
    assert_eq!(summary.rows, 97);
    assert_eq!(summary.missing, 1);
    assert!(summary
        .path
        .ends_with(Path::new("reports").join(report_file_name(&month))));
    assert_eq!(report_file_name(&month), "February 2023 Tweet Data.csv");

    let rows: Vec<ScoredRecord> = read_table(&summary.path).unwrap();
    let vanished = rows.iter().find(|r| r.id().as_str() == "105").unwrap();
    assert_eq!(vanished.points, Points::Unavailable);
    let still_there = rows.iter().find(|r| r.id().as_str() == "106").unwrap();
    assert_eq!(still_there.candidate.text, "gm from 106");
}

#[tokio::test]
async fn memo_refresh_tombstones_vanished_posts() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    Pipeline::new(&cfg, &scripted())
        .run(&RunOptions::default())
        .await
        .unwrap();

    let refresher = MockSource::new().with_posts(second_page());
    let refresh = Pipeline::new(&cfg, &refresher).refresh_memo().await.unwrap();
    assert_eq!(refresh.refreshed, 50);
    assert_eq!(refresh.tombstoned, refresh.requested - 50);
    assert_eq!(refresh.unresolved, 0);
}
