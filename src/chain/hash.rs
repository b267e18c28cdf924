//! Content Hashing
//!
//! Deterministic, versioned canonical encoding of a review record plus its
//! chain link, and the SHA-256 digest over it.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chain::record::{ReviewRecord, GENESIS_SENTINEL};
use crate::error::{LedgerError, Result};

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Version of the canonical field encoding a block was hashed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashVersion {
    V1,
}

impl HashVersion {
    pub const CURRENT: HashVersion = HashVersion::V1;

    pub fn as_i64(self) -> i64 {
        match self {
            HashVersion::V1 => 1,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        match value {
            1 => Ok(HashVersion::V1),
            other => Err(LedgerError::InvalidRecord(format!(
                "Unknown hash version: {}",
                other
            ))),
        }
    }

    fn header(self) -> &'static str {
        match self {
            HashVersion::V1 => "review-ledger/v1",
        }
    }
}

/// Computes block content hashes
#[derive(Debug, Clone, Copy)]
pub struct HashEngine {
    version: HashVersion,
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::new(HashVersion::CURRENT)
    }
}

impl HashEngine {
    pub fn new(version: HashVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> HashVersion {
        self.version
    }

    /// Canonical byte encoding of `(id, movie_title, review_text, rating,
    /// author_id, created_at, previous_hash)`.
    ///
    /// Strings are length-prefixed so a value can never imitate a field
    /// boundary; integers are decimal; the timestamp is RFC 3339 UTC with
    /// millisecond precision.
    pub fn canonicalize(&self, record: &ReviewRecord, previous_hash: &str) -> Result<Vec<u8>> {
        if record.id <= 0 {
            return Err(LedgerError::missing_field("id"));
        }
        if record.movie_title.is_empty() {
            return Err(LedgerError::missing_field("movie_title"));
        }
        if record.review_text.is_empty() {
            return Err(LedgerError::missing_field("review_text"));
        }
        if record.rating == 0 {
            return Err(LedgerError::missing_field("rating"));
        }
        if record.author_id <= 0 {
            return Err(LedgerError::missing_field("author_id"));
        }
        if previous_hash.is_empty() {
            return Err(LedgerError::missing_field("previous_hash"));
        }

        let mut out = Vec::with_capacity(
            128 + record.movie_title.len() + record.review_text.len(),
        );
        out.extend_from_slice(self.version.header().as_bytes());
        out.push(b'\n');
        push_int(&mut out, "id", record.id);
        push_str(&mut out, "movie_title", &record.movie_title);
        push_str(&mut out, "review_text", &record.review_text);
        push_int(&mut out, "rating", record.rating);
        push_int(&mut out, "author_id", record.author_id);
        push_str(
            &mut out,
            "created_at",
            &record.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        push_str(&mut out, "previous_hash", previous_hash);
        Ok(out)
    }

    /// Hex-encoded SHA-256 of `bytes`
    pub fn digest(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Content hash of `record` linked to `previous_hash`
    pub fn content_hash(&self, record: &ReviewRecord, previous_hash: &str) -> Result<String> {
        let canonical = self.canonicalize(record, previous_hash)?;
        Ok(self.digest(&canonical))
    }
}

fn push_int(out: &mut Vec<u8>, name: &str, value: i64) {
    out.extend_from_slice(format!("{}:{}\n", name, value).as_bytes());
}

fn push_str(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(format!("{}:{}:", name, value.len()).as_bytes());
    out.extend_from_slice(value.as_bytes());
    out.push(b'\n');
}

/// 64 lowercase hex characters
pub fn is_valid_hash(value: &str) -> bool {
    value.len() == HASH_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Exactly the genesis sentinel, nothing else
pub fn is_genesis_link(value: &str) -> bool {
    value == GENESIS_SENTINEL
}
