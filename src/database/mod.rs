pub mod models;
pub mod schema;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::chain::record::{Block, NewReview, ReviewRecord};
use crate::error::{LedgerError, Result};
use crate::store::LedgerStore;
use models::{block_from_row, encode_timestamp, record_from_row, BLOCK_COLUMNS, REVIEW_COLUMNS};

/// SQLite-backed ledger store
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn with_options(
        database_url: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!("Connected to ledger database {}", database_url);
        Ok(Database { pool })
    }

    /// Open a ledger that must already exist, for read-only auditing.
    ///
    /// Never creates the file or applies migrations; fails when the ledger
    /// tables are absent.
    pub async fn open_existing(database_url: &str, busy_timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(false)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                LedgerError::ConfigError(format!("Cannot open ledger {}: {}", database_url, e))
            })?;

        let db = Database { pool };
        db.ensure_schema().await?;
        info!("Opened existing ledger database {}", database_url);
        Ok(db)
    }

    /// Fails unless both ledger tables exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        for table in ["reviews", "ledger_blocks"] {
            let found = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;
            if found.is_none() {
                return Err(LedgerError::ConfigError(format!(
                    "Database has no {} table; not a review ledger",
                    table
                )));
            }
        }
        Ok(())
    }

    /// Private in-memory database with its schema applied.
    ///
    /// A single connection that never expires: every SQLite `:memory:`
    /// connection is its own database.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Database { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        for (name, sql) in schema::MIGRATIONS {
            sqlx::raw_sql(sql).execute(&self.pool).await?;
            debug!("Applied migration {}", name);
        }
        Ok(())
    }

    /// Insert a review without a block, the way rows predating the ledger
    /// exist. Returns the assigned id.
    pub async fn import_unchained(
        &self,
        review: &NewReview,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        review.validate()?;
        let result = sqlx::query(
            r#"
            INSERT INTO reviews (movie_title, review_text, rating, author_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&review.movie_title)
        .bind(&review.review_text)
        .bind(review.rating)
        .bind(review.author_id)
        .bind(encode_timestamp(&created_at.trunc_subsecs(3)))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Commit `block`, and `record` when given, inside `BEGIN IMMEDIATE`.
    /// Any failure, or dropping the future, rolls the whole write back.
    async fn write_transaction(
        &self,
        record: Option<&ReviewRecord>,
        block: &Block,
        expected_tail: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        commit_block(&mut tx, record, block, expected_tail).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Tail check and inserts; the caller holds the write lock.
async fn commit_block(
    conn: &mut SqliteConnection,
    record: Option<&ReviewRecord>,
    block: &Block,
    expected_tail: Option<&str>,
) -> Result<()> {
    let tail: Option<String> = sqlx::query(
        "SELECT content_hash FROM ledger_blocks ORDER BY sequence_number DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?
    .map(|row| row.try_get("content_hash"))
    .transpose()?;

    if tail.as_deref() != expected_tail {
        return Err(LedgerError::tail_moved(expected_tail, tail.as_deref()));
    }

    let collision = sqlx::query("SELECT 1 FROM ledger_blocks WHERE content_hash = ?")
        .bind(&block.content_hash)
        .fetch_optional(&mut *conn)
        .await?;
    if collision.is_some() {
        return Err(LedgerError::HashCollision {
            hash: block.content_hash.clone(),
        });
    }

    match record {
        Some(record) => {
            sqlx::query(
                r#"
                INSERT INTO reviews (id, movie_title, review_text, rating, author_id, created_at, supersedes_id)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.id)
            .bind(&record.movie_title)
            .bind(&record.review_text)
            .bind(record.rating)
            .bind(record.author_id)
            .bind(encode_timestamp(&record.created_at))
            .bind(record.supersedes)
            .execute(&mut *conn)
            .await
            .map_err(|e| conflict_or_database(e, "review id"))?;
        }
        None => {
            let exists = sqlx::query("SELECT 1 FROM reviews WHERE id = ?")
                .bind(block.record_id)
                .fetch_optional(&mut *conn)
                .await?;
            if exists.is_none() {
                return Err(LedgerError::RecordNotFound(block.record_id));
            }
        }
    }

    sqlx::query(
        r#"
        INSERT INTO ledger_blocks (sequence_number, record_id, content_hash, previous_hash, hash_version, chained_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(block.sequence_number as i64)
    .bind(block.record_id)
    .bind(&block.content_hash)
    .bind(&block.previous_hash)
    .bind(block.hash_version.as_i64())
    .bind(encode_timestamp(&Utc::now()))
    .execute(&mut *conn)
    .await
    .map_err(|e| conflict_or_database(e, "block"))?;

    Ok(())
}

/// Unique-constraint failures mean another writer got there first.
fn conflict_or_database(err: sqlx::Error, what: &str) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            LedgerError::AppendConflict(format!("{} already taken: {}", what, db.message()))
        }
        _ => err.into(),
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn get_tail(&self) -> Result<Option<Block>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks ORDER BY sequence_number DESC LIMIT 1",
            BLOCK_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(block_from_row).transpose()
    }

    async fn next_record_id(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(id), 0) + 1 AS next_id FROM reviews")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("next_id")?)
    }

    async fn append(
        &self,
        record: &ReviewRecord,
        block: &Block,
        expected_tail: Option<&str>,
    ) -> Result<()> {
        self.write_transaction(Some(record), block, expected_tail).await?;
        debug!("Appended block {}", block.summary());
        Ok(())
    }

    async fn attach(&self, block: &Block, expected_tail: Option<&str>) -> Result<()> {
        self.write_transaction(None, block, expected_tail).await?;
        debug!("Attached block {}", block.summary());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<Block>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks ORDER BY sequence_number ASC",
            BLOCK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(block_from_row).collect()
    }

    async fn get_by_sequence(&self, sequence_number: u64) -> Result<Option<Block>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks WHERE sequence_number = ?",
            BLOCK_COLUMNS
        ))
        .bind(sequence_number as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(block_from_row).transpose()
    }

    async fn get_by_record_id(&self, record_id: i64) -> Result<Option<Block>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ledger_blocks WHERE record_id = ?",
            BLOCK_COLUMNS
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(block_from_row).transpose()
    }

    async fn get_record(&self, record_id: i64) -> Result<Option<ReviewRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM reviews WHERE id = ?", REVIEW_COLUMNS))
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn contains_hash(&self, content_hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM ledger_blocks WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn unchained_records(&self) -> Result<Vec<ReviewRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM reviews
            WHERE id NOT IN (SELECT record_id FROM ledger_blocks)
            ORDER BY id ASC
            "#,
            REVIEW_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
