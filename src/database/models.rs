use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::chain::hash::HashVersion;
use crate::chain::record::{Block, RecordFields, ReviewRecord};
use crate::error::{LedgerError, Result};

pub const BLOCK_COLUMNS: &str =
    "sequence_number, record_id, content_hash, previous_hash, hash_version";

pub const REVIEW_COLUMNS: &str =
    "id, movie_title, review_text, rating, author_id, created_at, supersedes_id";

/// Timestamps are stored in the same text form they are hashed in.
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| LedgerError::InvalidRecord(format!("Bad timestamp {:?}: {}", raw, e)))
}

pub fn block_from_row(row: &SqliteRow) -> Result<Block> {
    let sequence_number: i64 = row.try_get("sequence_number")?;
    let sequence_number = u64::try_from(sequence_number).map_err(|_| {
        LedgerError::InvalidRecord(format!("Negative sequence number {}", sequence_number))
    })?;

    Ok(Block {
        sequence_number,
        record_id: row.try_get("record_id")?,
        content_hash: row.try_get("content_hash")?,
        previous_hash: row.try_get("previous_hash")?,
        hash_version: HashVersion::from_i64(row.try_get("hash_version")?)?,
    })
}

pub fn record_from_row(row: &SqliteRow) -> Result<ReviewRecord> {
    let created_at: Option<String> = row.try_get("created_at")?;
    let created_at = match created_at {
        Some(raw) => Some(decode_timestamp(&raw)?),
        None => None,
    };

    let fields = RecordFields {
        id: row.try_get("id")?,
        movie_title: row.try_get("movie_title")?,
        review_text: row.try_get("review_text")?,
        rating: row.try_get("rating")?,
        author_id: row.try_get("author_id")?,
        created_at,
        supersedes: row.try_get("supersedes_id")?,
    };

    ReviewRecord::try_from(fields)
}
