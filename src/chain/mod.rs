//! Review Hash Chain
//!
//! Tamper-evident ledger over review records: deterministic content
//! hashing, chain construction and chain verification.

pub mod builder;
pub mod hash;
pub mod record;
pub mod verify;

pub use builder::{BackfillSummary, ChainBuilder};
pub use hash::{HashEngine, HashVersion};
pub use record::{Block, NewReview, RecordFields, ReviewRecord, GENESIS_SENTINEL};
pub use verify::{
    ChainBreak, ChainBreakKind, ChainVerifier, ContentOnlyCheck, VerificationReport, VerifyMode,
};
