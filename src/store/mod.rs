//! Ledger Store
//!
//! Storage contract the chain builder and verifier depend on, plus an
//! in-process implementation. The SQLite implementation lives in
//! [`crate::database`].

pub mod memory;

pub use memory::MemoryLedgerStore;

use async_trait::async_trait;

use crate::chain::record::{Block, ReviewRecord};
use crate::error::Result;

/// Durable, ordered storage of review records and their blocks.
///
/// `append` and `attach` are compare-and-swap commits: they only succeed if
/// the ledger tail still carries `expected_tail` (`None` meaning the ledger is
/// empty), and they make the record and block visible together or not at all.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Highest-sequence block, or `None` while the ledger is empty.
    async fn get_tail(&self) -> Result<Option<Block>>;

    /// Id the store will assign to the next record.
    async fn next_record_id(&self) -> Result<i64>;

    /// Persist a new record together with its block.
    async fn append(
        &self,
        record: &ReviewRecord,
        block: &Block,
        expected_tail: Option<&str>,
    ) -> Result<()>;

    /// Seal an already stored record that has no block yet.
    async fn attach(&self, block: &Block, expected_tail: Option<&str>) -> Result<()>;

    /// Every block in ascending sequence order. Each call starts from genesis.
    async fn get_all(&self) -> Result<Vec<Block>>;

    async fn get_by_sequence(&self, sequence_number: u64) -> Result<Option<Block>>;

    async fn get_by_record_id(&self, record_id: i64) -> Result<Option<Block>>;

    /// Current stored content of a record, whatever happened to it since chaining.
    async fn get_record(&self, record_id: i64) -> Result<Option<ReviewRecord>>;

    async fn contains_hash(&self, content_hash: &str) -> Result<bool>;

    /// Records without a block, ascending by id.
    async fn unchained_records(&self) -> Result<Vec<ReviewRecord>>;
}
