#![allow(dead_code)]

use review_ledger::chain::{ChainBuilder, NewReview};
use review_ledger::database::Database;
use review_ledger::store::MemoryLedgerStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Setup an in-memory SQLite ledger for testing
pub async fn setup_test_db() -> Arc<Database> {
    Arc::new(
        Database::new_in_memory()
            .await
            .expect("Failed to create test database"),
    )
}

/// File-backed SQLite ledger with a multi-connection pool
pub async fn setup_file_db(dir: &Path) -> Arc<Database> {
    let url = format!("sqlite://{}", dir.join("ledger.db").display());
    let db = Database::with_options(&url, 8, Duration::from_secs(10))
        .await
        .expect("Failed to open file database");
    db.run_migrations().await.expect("Failed to run migrations");
    Arc::new(db)
}

pub fn memory_builder() -> ChainBuilder<MemoryLedgerStore> {
    ChainBuilder::new(Arc::new(MemoryLedgerStore::new()))
}

/// Reviews A, B and C
pub fn sample_reviews() -> Vec<NewReview> {
    vec![
        NewReview::new("The Thing", "Paranoia on ice.", 5, 1),
        NewReview::new("Clue", "Communism was just a red herring.", 4, 2),
        NewReview::new("Cats", "Digital fur technology.", 1, 3),
    ]
}
