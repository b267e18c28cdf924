//! In-memory ledger store
//!
//! Keeps records and blocks behind a single `RwLock`. Appends hold the
//! write lock across the tail check and the insert, so readers observe either
//! the previous tail or the complete new block.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

use crate::chain::record::{Block, ReviewRecord};
use crate::error::{LedgerError, Result};
use crate::store::LedgerStore;

#[derive(Default)]
struct LedgerState {
    records: BTreeMap<i64, ReviewRecord>,
    blocks: Vec<Block>,
    hashes: HashSet<String>,
    links: HashSet<String>,
    next_id: i64,
}

impl LedgerState {
    fn tail_hash(&self) -> Option<&str> {
        self.blocks.last().map(|b| b.content_hash.as_str())
    }

    /// Everything a commit must satisfy before it touches state
    fn check_commit(&self, block: &Block, expected_tail: Option<&str>) -> Result<()> {
        if self.tail_hash() != expected_tail {
            return Err(LedgerError::tail_moved(expected_tail, self.tail_hash()));
        }
        if block.sequence_number != self.blocks.len() as u64 {
            return Err(LedgerError::AppendConflict(format!(
                "Sequence {} already taken",
                block.sequence_number
            )));
        }
        if self.hashes.contains(&block.content_hash) {
            return Err(LedgerError::HashCollision {
                hash: block.content_hash.clone(),
            });
        }
        if self.links.contains(&block.previous_hash) {
            return Err(LedgerError::AppendConflict(format!(
                "Another block already links to {}",
                block.previous_hash
            )));
        }
        if self.blocks.iter().any(|b| b.record_id == block.record_id) {
            return Err(LedgerError::AppendConflict(format!(
                "Review {} is already chained",
                block.record_id
            )));
        }
        Ok(())
    }

    fn push_block(&mut self, block: &Block) {
        self.hashes.insert(block.content_hash.clone());
        self.links.insert(block.previous_hash.clone());
        self.blocks.push(block.clone());
    }
}

/// Ledger store held entirely in process memory
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Store a record without chaining it, as rows predating the ledger are.
    /// Returns the assigned id.
    pub async fn import_unchained(&self, mut record: ReviewRecord) -> i64 {
        let mut state = self.state.write().await;
        let id = state.next_id.max(1);
        record.id = id;
        state.records.insert(id, record);
        state.next_id = id + 1;
        id
    }

    /// Replace a stored record in place without touching its block.
    ///
    /// This bypasses the chain entirely and exists to simulate out-of-band
    /// edits to storage.
    pub async fn overwrite_record(&self, record: ReviewRecord) -> Result<()> {
        let mut state = self.state.write().await;
        match state.records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(LedgerError::RecordNotFound(record.id)),
        }
    }

    /// Replace a stored block in place. Same caveat as [`Self::overwrite_record`].
    pub async fn overwrite_block(&self, block: Block) -> Result<()> {
        let mut state = self.state.write().await;
        let index = block.sequence_number as usize;
        match state.blocks.get_mut(index) {
            Some(slot) => {
                *slot = block;
                Ok(())
            }
            None => Err(LedgerError::BlockNotFound(block.sequence_number)),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.blocks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn get_tail(&self) -> Result<Option<Block>> {
        Ok(self.state.read().await.blocks.last().cloned())
    }

    async fn next_record_id(&self) -> Result<i64> {
        Ok(self.state.read().await.next_id.max(1))
    }

    async fn append(
        &self,
        record: &ReviewRecord,
        block: &Block,
        expected_tail: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_commit(block, expected_tail)?;
        if state.records.contains_key(&record.id) {
            return Err(LedgerError::AppendConflict(format!(
                "Review id {} already assigned",
                record.id
            )));
        }

        state.records.insert(record.id, record.clone());
        state.next_id = state.next_id.max(record.id + 1);
        state.push_block(block);
        debug!("Appended block {}", block.summary());
        Ok(())
    }

    async fn attach(&self, block: &Block, expected_tail: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.records.contains_key(&block.record_id) {
            return Err(LedgerError::RecordNotFound(block.record_id));
        }
        state.check_commit(block, expected_tail)?;
        state.push_block(block);
        debug!("Attached block {}", block.summary());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Block>> {
        Ok(self.state.read().await.blocks.clone())
    }

    async fn get_by_sequence(&self, sequence_number: u64) -> Result<Option<Block>> {
        let state = self.state.read().await;
        Ok(state.blocks.get(sequence_number as usize).cloned())
    }

    async fn get_by_record_id(&self, record_id: i64) -> Result<Option<Block>> {
        let state = self.state.read().await;
        Ok(state.blocks.iter().find(|b| b.record_id == record_id).cloned())
    }

    async fn get_record(&self, record_id: i64) -> Result<Option<ReviewRecord>> {
        Ok(self.state.read().await.records.get(&record_id).cloned())
    }

    async fn contains_hash(&self, content_hash: &str) -> Result<bool> {
        Ok(self.state.read().await.hashes.contains(content_hash))
    }

    async fn unchained_records(&self) -> Result<Vec<ReviewRecord>> {
        let state = self.state.read().await;
        let chained: HashSet<i64> = state.blocks.iter().map(|b| b.record_id).collect();
        Ok(state
            .records
            .values()
            .filter(|r| !chained.contains(&r.id))
            .cloned()
            .collect())
    }
}
