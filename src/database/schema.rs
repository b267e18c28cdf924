// Database schema definitions and migrations

pub const REVIEW_LEDGER_SCHEMA: &str = include_str!("../../migrations/001_review_ledger.sql");

/// Migrations in the order they must run.
pub const MIGRATIONS: &[(&str, &str)] = &[("001_review_ledger", REVIEW_LEDGER_SCHEMA)];
