//! Recall scenarios: semantic ranking with date bounds, score bounds,
//! retired/superseded exclusion, and the session-start budget split.

use agenr_e2e_tests::harness::TestDb;
use agenr_e2e_tests::mocks::MockEmbedder;

use agenr_core::recall::{self, session_start, RecallSettings};
use agenr_core::{
    EntryType, Expiry, NewEntry, RecallContext, RecallQuery, RetireOptions, RetireQuery,
    SessionCategory,
};
use chrono::{Duration, Utc};

/// Seed scenario 3: a date bound excludes out-of-window entries even when
/// they would top the similarity ranking.
#[tokio::test]
async fn semantic_recall_with_date_bound() {
    let db = TestDb::new();
    let embedder = MockEmbedder::new();
    db.seed_fact("tooling", "pnpm", "h1").await;

    // Exact text match: without bounds this is the top hit
    let query = RecallQuery::semantic("pnpm");
    let results = recall::recall(&db.store, &embedder, &query, &RecallSettings::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    // since = 7 days in the future: today's entry must vanish even though
    // its cosine similarity is 1.0
    let mut bounded = RecallQuery::semantic("pnpm");
    bounded.since = Some(Utc::now() + Duration::days(7));
    let results = recall::recall(&db.store, &embedder, &bounded, &RecallSettings::default())
        .await
        .unwrap();
    assert!(results.is_empty());

    // until in the past likewise excludes entries created after it
    let mut bounded = RecallQuery::semantic("pnpm");
    bounded.until = Some(Utc::now() - Duration::days(1));
    let results = recall::recall(&db.store, &embedder, &bounded, &RecallSettings::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}

/// Freshness anchor: with `until` supplied, recency decay anchors on the
/// bound while the freshness boost still reads real now.
#[tokio::test]
async fn until_anchors_recency_not_freshness() {
    let db = TestDb::new();
    let embedder = MockEmbedder::new();
    let mut entry = NewEntry::new(EntryType::Fact, "anchored", "pnpm anchoring");
    entry.importance = 9;
    db.seed(vec![entry], "h1").await;

    let mut unanchored = RecallQuery::semantic("pnpm anchoring");
    unanchored.no_update = true;
    let baseline = recall::recall(&db.store, &embedder, &unanchored, &RecallSettings::default())
        .await
        .unwrap();

    let mut anchored = RecallQuery::semantic("pnpm anchoring");
    anchored.until = Some(Utc::now());
    anchored.no_update = true;
    let bounded = recall::recall(&db.store, &embedder, &anchored, &RecallSettings::default())
        .await
        .unwrap();

    // until = now: identical anchor, identical breakdowns
    assert_eq!(baseline.len(), 1);
    assert_eq!(bounded.len(), 1);
    assert!((baseline[0].scores.recency - bounded[0].scores.recency).abs() < 1e-9);
    assert!((baseline[0].scores.freshness - bounded[0].scores.freshness).abs() < 1e-9);
}

/// Score bounds: every returned score is finite and inside [0, 1].
#[tokio::test]
async fn scores_are_bounded() {
    let db = TestDb::new();
    let embedder = MockEmbedder::new();

    let mut batch = Vec::new();
    for i in 0..20 {
        let mut entry = NewEntry::new(
            EntryType::parse_name(["fact", "todo", "preference", "event"][i % 4]),
            format!("subject {i}"),
            format!("entry body number {i} about pnpm and tooling"),
        );
        entry.importance = (i as i64 % 10) + 1;
        entry.expiry = [Expiry::Core, Expiry::Permanent, Expiry::Temporary][i % 3];
        batch.push(entry);
    }
    db.seed(batch, "h1").await;

    let mut query = RecallQuery::semantic("pnpm tooling");
    query.limit = Some(50);
    let results = recall::recall(&db.store, &embedder, &query, &RecallSettings::default())
        .await
        .unwrap();

    assert!(!results.is_empty());
    for result in &results {
        assert!(result.score.is_finite());
        assert!((0.0..=1.0).contains(&result.score), "score {}", result.score);
    }
    // Sorted descending
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

/// Retired and superseded entries never surface, in any mode.
#[tokio::test]
async fn recall_excludes_retired_everywhere() {
    let db = TestDb::new();
    let embedder = MockEmbedder::new();
    db.seed_fact("visible", "pnpm visible entry", "h1").await;
    db.seed_fact("hidden", "pnpm hidden entry", "h2").await;

    let hidden_id = db
        .store
        .all_active_entries()
        .unwrap()
        .iter()
        .find(|e| e.subject == "hidden")
        .unwrap()
        .id
        .clone();
    db.store
        .retire(&RetireQuery::Id(hidden_id.clone()), &RetireOptions::default())
        .unwrap();

    for query in [
        RecallQuery::semantic("pnpm entry"),
        RecallQuery {
            context: RecallContext::SessionStart,
            ..Default::default()
        },
        RecallQuery {
            browse: true,
            ..Default::default()
        },
    ] {
        let results = recall::recall(&db.store, &embedder, &query, &RecallSettings::default())
            .await
            .unwrap();
        for result in &results {
            assert!(!result.entry.retired);
            assert!(result.entry.superseded_by.is_none());
            assert_ne!(result.entry.id, hidden_id);
        }
    }

    // Still queryable by id for audit
    assert!(db.store.get_entry(&hidden_id).unwrap().is_some());
}

/// Seed scenario 4: 200 candidates (30 todos, 80 preferences, 90 other)
/// against a 2000-token budget. Fractions land inside the clamps, the
/// recent floor holds, and the total stays within budget plus one entry.
#[test]
fn session_start_budget_split_seed_scenario() {
    let split = session_start::budget_split(30, 80, 90);
    assert!((0.10..=0.30).contains(&split.active));
    assert!((0.20..=0.40).contains(&split.preferences));
    assert!(split.recent >= 0.20);
    assert!((split.active + split.preferences + split.recent - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn session_start_budget_property() {
    let db = TestDb::new();

    let mut batch = Vec::new();
    for i in 0..30 {
        batch.push(NewEntry::new(
            EntryType::Todo,
            format!("todo {i}"),
            format!("open task {i} with a handful of words"),
        ));
    }
    for i in 0..80 {
        batch.push(NewEntry::new(
            EntryType::Preference,
            format!("pref {i}"),
            format!("preference body {i} with several descriptive words attached"),
        ));
    }
    for i in 0..90 {
        batch.push(NewEntry::new(
            EntryType::Fact,
            format!("fact {i}"),
            format!("general knowledge item {i} with several descriptive words attached"),
        ));
    }
    db.seed(batch, "h1").await;

    let budget = 2000;
    let query = RecallQuery {
        context: RecallContext::SessionStart,
        no_update: true,
        ..Default::default()
    };
    let results = recall::recall(
        &db.store,
        &MockEmbedder::new(),
        &query,
        &RecallSettings {
            session_start_budget: budget,
        },
    )
    .await
    .unwrap();

    assert!(!results.is_empty());

    let non_core: Vec<_> = results
        .iter()
        .filter(|r| r.category != Some(SessionCategory::Core))
        .collect();
    let estimates: Vec<usize> = non_core
        .iter()
        .map(|r| session_start::token_estimate(r))
        .collect();
    let total: usize = estimates.iter().sum();
    let max_single = estimates.iter().copied().max().unwrap_or(0);
    assert!(
        total <= budget + max_single,
        "budget property violated: {total} > {budget} + {max_single}"
    );

    // All three categories are represented
    for category in [
        SessionCategory::Active,
        SessionCategory::Preferences,
        SessionCategory::Recent,
    ] {
        assert!(
            non_core.iter().any(|r| r.category == Some(category)),
            "missing category {category:?}"
        );
    }
}

/// Core entries bypass the budget and always lead the output.
#[tokio::test]
async fn session_start_core_always_first() {
    let db = TestDb::new();
    let mut core = NewEntry::new(EntryType::Fact, "identity", "user is alex");
    core.expiry = Expiry::Core;
    db.seed(vec![core], "h1").await;
    db.seed_fact("misc", "something recent", "h2").await;

    let query = RecallQuery {
        context: RecallContext::SessionStart,
        no_update: true,
        ..Default::default()
    };
    let results = recall::recall(
        &db.store,
        &MockEmbedder::new(),
        &query,
        &RecallSettings {
            // A starvation budget: core still comes through
            session_start_budget: 1,
        },
    )
    .await
    .unwrap();

    assert_eq!(results[0].category, Some(SessionCategory::Core));
    assert_eq!(results[0].entry.subject, "identity");
}

/// Recall-count milestones promote importance, capped at 9.
#[tokio::test]
async fn repeated_recall_promotes_importance() {
    let db = TestDb::new();
    let embedder = MockEmbedder::new();
    let mut entry = NewEntry::new(EntryType::Fact, "popular", "frequently recalled pnpm fact");
    entry.importance = 5;
    db.seed(vec![entry], "h1").await;

    let query = RecallQuery::semantic("frequently recalled pnpm fact");
    for _ in 0..10 {
        recall::recall(&db.store, &embedder, &query, &RecallSettings::default())
            .await
            .unwrap();
    }

    let entry = &db.store.all_active_entries().unwrap()[0];
    assert_eq!(entry.recall_count, 10);
    // Bumped at 3 and at 10
    assert_eq!(entry.importance, 7);
    assert_eq!(entry.recall_intervals.len(), 10);
}
