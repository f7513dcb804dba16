//! Test database harness

use agenr_core::{EntryType, NewEntry, Store, StoreOptions, StoreReport};
use std::sync::Arc;
use tempfile::TempDir;

use crate::mocks::{MockEmbedder, ScriptedJudge, DIMS};

/// A throwaway store plus the tempdir keeping it alive
pub struct TestDb {
    pub store: Arc<Store>,
    pub dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(
            Store::open(Some(dir.path().join("e2e.db")), DIMS).expect("open store"),
        );
        Self { store, dir }
    }

    /// Reopen a store over the same directory (ledger replay scenarios)
    pub fn reopen(&self, db_name: &str) -> Arc<Store> {
        Arc::new(
            Store::open(Some(self.dir.path().join(db_name)), DIMS).expect("reopen store"),
        )
    }

    /// Seed entries with vector dedup off and a judge that never relates
    pub async fn seed(&self, entries: Vec<NewEntry>, ingest_hash: &str) -> StoreReport {
        let options = StoreOptions {
            online_dedup: false,
            ..Default::default()
        };
        self.store
            .store_entries(
                entries,
                "seed.jsonl",
                ingest_hash,
                &options,
                &MockEmbedder::new(),
                &ScriptedJudge::unrelated(),
            )
            .await
            .expect("seed entries")
    }

    /// One fact with the given subject/content
    pub async fn seed_fact(&self, subject: &str, content: &str, ingest_hash: &str) -> StoreReport {
        self.seed(vec![NewEntry::new(EntryType::Fact, subject, content)], ingest_hash)
            .await
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}
