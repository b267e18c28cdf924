//! Chain Builder
//!
//! Seals every new review into the ledger. Each append reads the tail from
//! the store, hashes the record against it and commits with a
//! compare-and-swap on that tail, retrying when another writer won the race.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::chain::hash::HashEngine;
use crate::chain::record::{next_link, Block, NewReview, ReviewRecord};
use crate::error::{LedgerError, Result};
use crate::store::LedgerStore;

pub const DEFAULT_MAX_APPEND_RETRIES: u32 = 32;

/// Outcome of chaining pre-existing records
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillSummary {
    pub chained: Vec<Block>,
}

impl BackfillSummary {
    pub fn count(&self) -> usize {
        self.chained.len()
    }
}

/// Appends review records and their blocks to a ledger store
pub struct ChainBuilder<S: LedgerStore + ?Sized> {
    store: Arc<S>,
    engine: HashEngine,
    max_retries: u32,
}

impl<S: LedgerStore + ?Sized> Clone for ChainBuilder<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            engine: self.engine,
            max_retries: self.max_retries,
        }
    }
}

impl<S: LedgerStore + ?Sized> ChainBuilder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            engine: HashEngine::default(),
            max_retries: DEFAULT_MAX_APPEND_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist `review` together with the block that chains it.
    ///
    /// Nothing is committed when this returns an error.
    pub async fn append_block(&self, review: NewReview) -> Result<Block> {
        self.append_record(review, None).await
    }

    /// Record an edit as a new review superseding `original_id`.
    ///
    /// Chained content is never rewritten; the original record and block stay
    /// as they are and the revision joins the chain at the tail.
    pub async fn revise(
        &self,
        original_id: i64,
        review_text: impl Into<String>,
        rating: i64,
        author_id: i64,
    ) -> Result<Block> {
        let original = self
            .store
            .get_record(original_id)
            .await?
            .ok_or(LedgerError::RecordNotFound(original_id))?;

        if original.author_id != author_id {
            return Err(LedgerError::InvalidRecord(format!(
                "Author {} may not revise review {}",
                author_id, original_id
            )));
        }
        if self.store.get_by_record_id(original_id).await?.is_none() {
            return Err(LedgerError::InvalidRecord(format!(
                "Review {} is not chained yet",
                original_id
            )));
        }

        let revision = NewReview::new(original.movie_title, review_text, rating, author_id);
        let block = self.append_record(revision, Some(original_id)).await?;
        info!(
            "Review {} revised as review {} (block #{})",
            original_id, block.record_id, block.sequence_number
        );
        Ok(block)
    }

    /// Chain every stored record that has no block yet, oldest first.
    ///
    /// Stops at the first record that cannot be chained; records chained
    /// before it stay committed.
    pub async fn backfill(&self) -> Result<BackfillSummary> {
        let pending = self.store.unchained_records().await?;
        info!("Backfilling {} unchained review(s)", pending.len());

        let mut summary = BackfillSummary::default();
        for record in pending {
            let block = self.attach_with_retry(&record).await?;
            summary.chained.push(block);
        }

        info!("Backfill complete: {} block(s) chained", summary.count());
        Ok(summary)
    }

    async fn append_record(&self, review: NewReview, supersedes: Option<i64>) -> Result<Block> {
        review.validate()?;
        let created_at = Utc::now();

        for attempt in 1..=self.max_retries {
            let id = self
                .store
                .next_record_id()
                .await
                .map_err(|e| LedgerError::TailRead(e.to_string()))?;
            let mut record = review.clone().into_record(id, created_at);
            record.supersedes = supersedes;

            match self.try_commit(&record, true).await {
                Ok(block) => {
                    info!("Chained review {} as block #{}", record.id, block.sequence_number);
                    return Ok(block);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Append attempt {} lost the race: {}", attempt, e);
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::AppendConflict(format!(
            "Gave up after {} attempts",
            self.max_retries
        )))
    }

    async fn attach_with_retry(&self, record: &ReviewRecord) -> Result<Block> {
        for attempt in 1..=self.max_retries {
            match self.try_commit(record, false).await {
                Ok(block) => return Ok(block),
                Err(e) if e.is_retryable() => {
                    warn!("Commit attempt {} for review {} lost the race: {}", attempt, record.id, e);
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::AppendConflict(format!(
            "Gave up chaining review {} after {} attempts",
            record.id, self.max_retries
        )))
    }

    /// One read-tail, compute, write-if-tail-unchanged round.
    async fn try_commit(&self, record: &ReviewRecord, insert: bool) -> Result<Block> {
        let tail = self
            .store
            .get_tail()
            .await
            .map_err(|e| LedgerError::TailRead(e.to_string()))?;

        let block = self.seal(record, tail.as_ref())?;
        debug!("Sealed {}", block.summary());

        let expected_tail = tail.as_ref().map(|t| t.content_hash.as_str());

        if self.store.contains_hash(&block.content_hash).await? {
            // A racing writer may have committed this exact block first
            let current = self
                .store
                .get_tail()
                .await
                .map_err(|e| LedgerError::TailRead(e.to_string()))?;
            let current_hash = current.as_ref().map(|t| t.content_hash.as_str());
            if current_hash != expected_tail {
                return Err(LedgerError::tail_moved(expected_tail, current_hash));
            }

            error!(
                "Content hash {} for review {} already exists in the ledger",
                block.content_hash, record.id
            );
            return Err(LedgerError::HashCollision {
                hash: block.content_hash,
            });
        }

        let committed = if insert {
            self.store.append(record, &block, expected_tail).await
        } else {
            self.store.attach(&block, expected_tail).await
        };

        match committed {
            Ok(()) => Ok(block),
            Err(e @ LedgerError::HashCollision { .. }) => {
                error!("Store rejected block for review {}: {}", record.id, e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Block that would follow `tail` for `record`.
    pub fn seal(&self, record: &ReviewRecord, tail: Option<&Block>) -> Result<Block> {
        let (sequence_number, previous_hash) = next_link(tail);
        let content_hash = self.engine.content_hash(record, &previous_hash)?;

        Ok(Block {
            sequence_number,
            record_id: record.id,
            content_hash,
            previous_hash,
            hash_version: self.engine.version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::record::GENESIS_SENTINEL;
    use crate::store::MemoryLedgerStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn builder() -> ChainBuilder<MemoryLedgerStore> {
        ChainBuilder::new(Arc::new(MemoryLedgerStore::new()))
    }

    /// Memory store whose tail reads can be made to fail or lag behind.
    #[derive(Default)]
    struct ScriptedStore {
        inner: Arc<MemoryLedgerStore>,
        stale_tail: Mutex<Option<Option<Block>>>,
        fail_tail: bool,
        fail_next_id: bool,
    }

    fn unreachable() -> LedgerError {
        LedgerError::DatabaseError("connection refused".to_string())
    }

    #[async_trait]
    impl LedgerStore for ScriptedStore {
        async fn get_tail(&self) -> Result<Option<Block>> {
            if self.fail_tail {
                return Err(unreachable());
            }
            if let Some(stale) = self.stale_tail.lock().unwrap().take() {
                return Ok(stale);
            }
            self.inner.get_tail().await
        }

        async fn next_record_id(&self) -> Result<i64> {
            if self.fail_next_id {
                return Err(unreachable());
            }
            self.inner.next_record_id().await
        }

        async fn append(
            &self,
            record: &ReviewRecord,
            block: &Block,
            expected_tail: Option<&str>,
        ) -> Result<()> {
            self.inner.append(record, block, expected_tail).await
        }

        async fn attach(&self, block: &Block, expected_tail: Option<&str>) -> Result<()> {
            self.inner.attach(block, expected_tail).await
        }

        async fn get_all(&self) -> Result<Vec<Block>> {
            self.inner.get_all().await
        }

        async fn get_by_sequence(&self, sequence_number: u64) -> Result<Option<Block>> {
            self.inner.get_by_sequence(sequence_number).await
        }

        async fn get_by_record_id(&self, record_id: i64) -> Result<Option<Block>> {
            self.inner.get_by_record_id(record_id).await
        }

        async fn get_record(&self, record_id: i64) -> Result<Option<ReviewRecord>> {
            self.inner.get_record(record_id).await
        }

        async fn contains_hash(&self, content_hash: &str) -> Result<bool> {
            self.inner.contains_hash(content_hash).await
        }

        async fn unchained_records(&self) -> Result<Vec<ReviewRecord>> {
            self.inner.unchained_records().await
        }
    }

    #[tokio::test]
    async fn test_first_append_is_genesis() {
        let builder = builder();
        let block = builder
            .append_block(NewReview::new("Stalker", "The zone provides.", 5, 1))
            .await
            .unwrap();

        assert_eq!(block.sequence_number, 0);
        assert_eq!(block.previous_hash, GENESIS_SENTINEL);
        assert_eq!(block.record_id, 1);
        assert_eq!(block.content_hash.len(), 64);
    }

    #[tokio::test]
    async fn test_blocks_link_to_tail() {
        let builder = builder();
        let first = builder
            .append_block(NewReview::new("Up", "Balloons.", 4, 1))
            .await
            .unwrap();
        let second = builder
            .append_block(NewReview::new("Heat", "Diner scene.", 5, 2))
            .await
            .unwrap();

        assert_eq!(second.sequence_number, 1);
        assert_eq!(second.previous_hash, first.content_hash);
        assert_eq!(second.record_id, 2);
    }

    #[tokio::test]
    async fn test_invalid_review_commits_nothing() {
        let builder = builder();
        let err = builder
            .append_block(NewReview::new("", "No title.", 3, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::MissingField(_)));
        assert!(builder.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_revise_appends_new_record() {
        let builder = builder();
        let original = builder
            .append_block(NewReview::new("Tenet", "Confusing.", 2, 9))
            .await
            .unwrap();

        let revised = builder
            .revise(original.record_id, "Better the second time.", 4, 9)
            .await
            .unwrap();
        assert_eq!(revised.sequence_number, 1);
        assert_eq!(revised.previous_hash, original.content_hash);

        let record = builder.store().get_record(revised.record_id).await.unwrap().unwrap();
        assert_eq!(record.supersedes, Some(original.record_id));
        assert_eq!(record.movie_title, "Tenet");

        // The original stays untouched
        let untouched = builder.store().get_record(original.record_id).await.unwrap().unwrap();
        assert_eq!(untouched.review_text, "Confusing.");
    }

    #[tokio::test]
    async fn test_revise_rejects_other_author() {
        let builder = builder();
        let original = builder
            .append_block(NewReview::new("Tenet", "Confusing.", 2, 9))
            .await
            .unwrap();

        let err = builder
            .revise(original.record_id, "Hijacked.", 1, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRecord(_)));

        let err = builder.revise(404, "Nothing.", 1, 9).await.unwrap_err();
        assert!(matches!(err, LedgerError::RecordNotFound(404)));
    }

    #[tokio::test]
    async fn test_backfill_links_legacy_rows() {
        let builder = builder();
        let store = builder.store().clone();
        for title in ["Ikiru", "Yojimbo"] {
            store
                .import_unchained(NewReview::new(title, "Legacy row.", 5, 1).into_record(0, Utc::now()))
                .await;
        }

        let summary = builder.backfill().await.unwrap();
        assert_eq!(summary.count(), 2);
        assert_eq!(summary.chained[0].previous_hash, GENESIS_SENTINEL);
        assert_eq!(summary.chained[1].previous_hash, summary.chained[0].content_hash);

        // A fresh review continues the same chain
        let next = builder
            .append_block(NewReview::new("Ran", "Kings fall.", 5, 1))
            .await
            .unwrap();
        assert_eq!(next.sequence_number, 2);
        assert_eq!(next.record_id, 3);
    }

    #[tokio::test]
    async fn test_losing_identical_commit_is_retryable() {
        let inner = Arc::new(MemoryLedgerStore::new());
        let winner = ChainBuilder::new(inner.clone());
        let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let record = NewReview::new("Heat", "Same text.", 5, 1).into_record(1, created_at);

        let committed = winner.try_commit(&record, true).await.unwrap();
        assert!(committed.is_genesis());

        // The loser read the tail before the winner committed the same block
        let loser = ChainBuilder::new(Arc::new(ScriptedStore {
            inner: inner.clone(),
            stale_tail: Mutex::new(Some(None)),
            ..Default::default()
        }));
        let err = loser.try_commit(&record, true).await.unwrap_err();
        assert!(matches!(err, LedgerError::AppendConflict(_)), "{:?}", err);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stale_tail_retries_to_success() {
        let inner = Arc::new(MemoryLedgerStore::new());
        let first = ChainBuilder::new(inner.clone())
            .append_block(NewReview::new("Alien", "In space.", 5, 1))
            .await
            .unwrap();

        let builder = ChainBuilder::new(Arc::new(ScriptedStore {
            inner: inner.clone(),
            stale_tail: Mutex::new(Some(None)),
            ..Default::default()
        }));
        let block = builder
            .append_block(NewReview::new("Aliens", "Game over.", 4, 1))
            .await
            .unwrap();

        assert_eq!(block.sequence_number, 1);
        assert_eq!(block.previous_hash, first.content_hash);
        assert_eq!(inner.len().await, 2);
    }

    #[tokio::test]
    async fn test_unreachable_tail_commits_nothing() {
        let inner = Arc::new(MemoryLedgerStore::new());
        let builder = ChainBuilder::new(Arc::new(ScriptedStore {
            inner: inner.clone(),
            fail_tail: true,
            ..Default::default()
        }));

        let err = builder
            .append_block(NewReview::new("Brazil", "Ducts.", 4, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TailRead(_)), "{:?}", err);
        assert!(!err.is_retryable());
        assert!(inner.is_empty().await);
        assert!(inner.get_record(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_id_allocation_commits_nothing() {
        let inner = Arc::new(MemoryLedgerStore::new());
        let builder = ChainBuilder::new(Arc::new(ScriptedStore {
            inner: inner.clone(),
            fail_next_id: true,
            ..Default::default()
        }));

        let err = builder
            .append_block(NewReview::new("Brazil", "Ducts.", 4, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TailRead(_)), "{:?}", err);
        assert!(inner.is_empty().await);
        assert!(inner.get_record(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backfill_with_unreachable_tail_leaves_rows_unchained() {
        let inner = Arc::new(MemoryLedgerStore::new());
        inner
            .import_unchained(NewReview::new("Ikiru", "Legacy row.", 5, 1).into_record(0, Utc::now()))
            .await;
        let builder = ChainBuilder::new(Arc::new(ScriptedStore {
            inner: inner.clone(),
            fail_tail: true,
            ..Default::default()
        }));

        let err = builder.backfill().await.unwrap_err();
        assert!(matches!(err, LedgerError::TailRead(_)));
        assert!(inner.is_empty().await);
        assert_eq!(inner.unchained_records().await.unwrap().len(), 1);
    }
}
