//! Review Records and Blocks
//!
//! Defines the review content sealed by the ledger and the immutable
//! block that links it into the hash chain.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::hash::HashVersion;
use crate::error::{LedgerError, Result};

/// `previous_hash` of the genesis block.
pub const GENESIS_SENTINEL: &str = "0";

/// Review as handed over by the CRUD layer at creation time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReview {
    pub movie_title: String,
    pub review_text: String,
    pub rating: i64,
    pub author_id: i64,
}

impl NewReview {
    pub fn new(
        movie_title: impl Into<String>,
        review_text: impl Into<String>,
        rating: i64,
        author_id: i64,
    ) -> Self {
        Self {
            movie_title: movie_title.into(),
            review_text: review_text.into(),
            rating,
            author_id,
        }
    }

    /// Reject reviews the collaborating system would not accept
    pub fn validate(&self) -> Result<()> {
        if self.movie_title.trim().is_empty() {
            return Err(LedgerError::missing_field("movie_title"));
        }
        if self.review_text.trim().is_empty() {
            return Err(LedgerError::missing_field("review_text"));
        }
        if self.rating == 0 {
            return Err(LedgerError::missing_field("rating"));
        }
        if !(1..=5).contains(&self.rating) {
            return Err(LedgerError::invalid_rating(self.rating));
        }
        if self.author_id <= 0 {
            return Err(LedgerError::missing_field("author_id"));
        }
        Ok(())
    }

    /// Bind the review to its store-assigned id and creation time.
    pub fn into_record(self, id: i64, created_at: DateTime<Utc>) -> ReviewRecord {
        ReviewRecord {
            id,
            movie_title: self.movie_title,
            review_text: self.review_text,
            rating: self.rating,
            author_id: self.author_id,
            // Canonical timestamps carry milliseconds; anything finer would not survive storage.
            created_at: created_at.trunc_subsecs(3),
            supersedes: None,
        }
    }
}

/// Persisted review content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: i64,
    pub movie_title: String,
    pub review_text: String,
    pub rating: i64,
    pub author_id: i64,
    pub created_at: DateTime<Utc>,
    /// Record this one replaces when a review is revised. Lineage only; not hashed.
    pub supersedes: Option<i64>,
}

/// Review row as read back from storage, where any column may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFields {
    pub id: Option<i64>,
    pub movie_title: Option<String>,
    pub review_text: Option<String>,
    pub rating: Option<i64>,
    pub author_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub supersedes: Option<i64>,
}

impl TryFrom<RecordFields> for ReviewRecord {
    type Error = LedgerError;

    fn try_from(fields: RecordFields) -> Result<Self> {
        Ok(ReviewRecord {
            id: fields.id.ok_or_else(|| LedgerError::missing_field("id"))?,
            movie_title: fields
                .movie_title
                .ok_or_else(|| LedgerError::missing_field("movie_title"))?,
            review_text: fields
                .review_text
                .ok_or_else(|| LedgerError::missing_field("review_text"))?,
            rating: fields.rating.ok_or_else(|| LedgerError::missing_field("rating"))?,
            author_id: fields
                .author_id
                .ok_or_else(|| LedgerError::missing_field("author_id"))?,
            created_at: fields
                .created_at
                .ok_or_else(|| LedgerError::missing_field("created_at"))?,
            supersedes: fields.supersedes,
        })
    }
}

/// Immutable link in the review hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub sequence_number: u64,
    pub record_id: i64,
    pub content_hash: String,
    pub previous_hash: String,
    pub hash_version: HashVersion,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.sequence_number == 0
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} review {} ({} <- {})",
            self.sequence_number, self.record_id, self.content_hash, self.previous_hash
        )
    }
}

/// Sequence number and link for the block that follows `tail`.
pub fn next_link(tail: Option<&Block>) -> (u64, String) {
    match tail {
        Some(tail) => (tail.sequence_number + 1, tail.content_hash.clone()),
        None => (0, GENESIS_SENTINEL.to_string()),
    }
}
