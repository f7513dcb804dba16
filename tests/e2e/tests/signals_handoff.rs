//! Signal watermark and handoff-protocol scenarios.

use agenr_e2e_tests::harness::TestDb;
use agenr_e2e_tests::mocks::{MockEmbedder, ScriptedJudge, ScriptedModelClient};

use agenr_core::transcript::Message;
use agenr_core::{
    EntryType, Handoff, ModelClient, ModelSet, NewEntry, SignalConfig, Signals,
};
use std::sync::Arc;
use std::time::Duration;

async fn seed_importance(db: &TestDb, importance: i64, subject: &str) {
    let mut entry = NewEntry::new(EntryType::Fact, subject, format!("content about {subject}"));
    entry.importance = importance;
    db.seed(vec![entry], &format!("hash-{subject}")).await;
}

fn message(role: &str, text: &str) -> Message {
    Message {
        role: role.to_string(),
        index: 0,
        text: text.to_string(),
        timestamp: None,
        byte_end: 0,
    }
}

/// Seed scenario 6: entries of importance 5, 7, 9 inserted in order. The
/// first check returns a two-entry notice and advances the watermark to the
/// importance-9 rowid; the second check returns none and leaves the
/// watermark unchanged.
#[tokio::test]
async fn signal_watermark_seed_scenario() {
    let db = TestDb::new();
    db.store.set_watermark("A", 0).unwrap();

    seed_importance(&db, 5, "five").await;
    seed_importance(&db, 7, "seven").await;
    seed_importance(&db, 9, "nine").await;

    let signals = Signals::new(Arc::clone(&db.store), SignalConfig::default());

    let notice = signals.check("A").expect("first check delivers");
    assert!(notice.starts_with("AGENR SIGNAL: 2 new high-importance entries"));
    assert!(notice.contains("[fact, imp:7] \"seven\""));
    assert!(notice.contains("[fact, imp:9] \"nine\""));
    assert!(!notice.contains("five"));
    assert!(notice.contains("-> Use agenr_recall query=\"seven\" for details."));

    let watermark = db.store.watermark("A").unwrap().unwrap();
    assert_eq!(watermark, db.store.max_rowid().unwrap());

    assert!(signals.check("A").is_none());
    assert_eq!(db.store.watermark("A").unwrap().unwrap(), watermark);
}

/// Watermark monotonicity: it only ever moves forward, and only when
/// qualifying or non-qualifying rows actually appeared.
#[tokio::test]
async fn watermark_is_monotone() {
    let db = TestDb::new();
    db.store.set_watermark("A", 0).unwrap();
    let signals = Signals::new(
        Arc::clone(&db.store),
        SignalConfig {
            cooldown: Duration::ZERO,
            max_per_session: 100,
            ..Default::default()
        },
    );

    let mut previous = 0;
    for round in 0..5 {
        // Alternate qualifying and non-qualifying inserts
        let importance = if round % 2 == 0 { 9 } else { 2 };
        seed_importance(&db, importance, &format!("round {round}")).await;
        signals.check("A");
        let current = db.store.watermark("A").unwrap().unwrap();
        assert!(current >= previous, "watermark regressed");
        assert_eq!(current, db.store.max_rowid().unwrap());
        previous = current;
    }
}

/// Retired entries never signal even above the importance bar.
#[tokio::test]
async fn retired_entries_do_not_signal() {
    let db = TestDb::new();
    db.store.set_watermark("A", 0).unwrap();
    seed_importance(&db, 9, "about to retire").await;

    let id = db.store.all_active_entries().unwrap()[0].id.clone();
    db.store
        .retire(
            &agenr_core::RetireQuery::Id(id),
            &agenr_core::RetireOptions::default(),
        )
        .unwrap();

    let signals = Signals::new(Arc::clone(&db.store), SignalConfig::default());
    assert!(signals.check("A").is_none());
    // The watermark still advanced past the retired row
    assert_eq!(
        db.store.watermark("A").unwrap().unwrap(),
        db.store.max_rowid().unwrap()
    );
}

/// Handoff protocol: fallback first, then the LLM upgrade retires the
/// fallback and replaces it with the four-paragraph summary.
#[tokio::test]
async fn handoff_fallback_then_upgrade() {
    let db = TestDb::new();
    let embedder = Arc::new(MockEmbedder::new());
    let judge = Arc::new(ScriptedJudge::unrelated());
    let handoff = Arc::new(Handoff::new(
        Arc::clone(&db.store),
        embedder,
        judge,
        None,
        &ModelSet::new("summary-model"),
    ));

    let messages = vec![
        message("user", "ship the retry logic"),
        message("assistant", "retry logic shipped behind a flag"),
    ];

    assert!(handoff.deliver("session-1", &messages, None).await);

    // Fallback landed synchronously
    let entries = db.store.all_active_entries().unwrap();
    assert_eq!(entries.len(), 1);
    let fallback = entries[0].clone();
    assert_eq!(fallback.entry_type, EntryType::Event);
    assert_eq!(fallback.importance, 9);
    assert!(fallback.subject.starts_with("session handoff "));
    assert!(fallback.tags.contains(&"handoff".to_string()));
    assert!(fallback.tags.contains(&"session".to_string()));
    assert!(fallback.content.contains("retry logic"));

    // Upgrade with a scripted summarizer
    let client: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient {
        response: "WORKING ON\nretry logic rollout\n\nKEY FINDINGS\nflag defaults off\n\nOPEN THREADS\nremove flag next week\n\nIMPORTANT FACTS\nretries cap at 3".to_string(),
    });
    handoff
        .upgrade(client, &fallback.subject, &messages, None, true)
        .await;

    let active = db.store.all_active_entries().unwrap();
    assert_eq!(active.len(), 1);
    assert!(active[0].content.contains("WORKING ON"));
    assert!(active[0].content.contains("IMPORTANT FACTS"));
    assert_eq!(active[0].subject, fallback.subject);

    // The fallback row survives retired for audit
    let old = db.store.get_entry(&fallback.id).unwrap().unwrap();
    assert!(old.retired);
    assert!(old.suppressed_in("session-start"));
}

/// An empty summary leaves the fallback untouched.
#[tokio::test]
async fn empty_summary_keeps_fallback() {
    let db = TestDb::new();
    let handoff = Arc::new(Handoff::new(
        Arc::clone(&db.store),
        Arc::new(MockEmbedder::new()),
        Arc::new(ScriptedJudge::unrelated()),
        None,
        &ModelSet::new("summary-model"),
    ));

    let messages = vec![message("user", "quick question"), message("assistant", "quick answer")];
    handoff.deliver("session-1", &messages, None).await;
    let fallback_id = db.store.all_active_entries().unwrap()[0].id.clone();

    let client: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient {
        response: "   ".to_string(),
    });
    let fallback_subject = db.store.get_entry(&fallback_id).unwrap().unwrap().subject;
    handoff
        .upgrade(client, &fallback_subject, &messages, None, true)
        .await;

    let active = db.store.all_active_entries().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, fallback_id);
}

/// One handoff per session id: replays within the guard window are no-ops.
#[tokio::test]
async fn handoff_is_idempotent_per_session() {
    let db = TestDb::new();
    let handoff = Arc::new(Handoff::new(
        Arc::clone(&db.store),
        Arc::new(MockEmbedder::new()),
        Arc::new(ScriptedJudge::unrelated()),
        None,
        &ModelSet::new("summary-model"),
    ));

    let messages = vec![message("user", "a"), message("assistant", "b")];
    assert!(handoff.deliver("session-1", &messages, None).await);
    assert!(!handoff.deliver("session-1", &messages, None).await);
    assert!(!handoff.deliver("session-1", &messages, None).await);
    assert_eq!(db.store.all_active_entries().unwrap().len(), 1);

    // A different session with a different exchange is its own handoff
    let other = vec![message("user", "c"), message("assistant", "d")];
    assert!(handoff.deliver("session-2", &other, None).await);
    assert_eq!(db.store.all_active_entries().unwrap().len(), 2);
}
