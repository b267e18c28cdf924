use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Failed to read ledger tail: {0}")]
    TailRead(String),

    #[error("Content hash {hash} already exists in the ledger")]
    HashCollision { hash: String },

    #[error("Append conflict: {0}")]
    AppendConflict(String),

    #[error("Review record {0} not found")]
    RecordNotFound(i64),

    #[error("Block {0} not found")]
    BlockNotFound(u64),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub fn missing_field(name: &str) -> Self {
        Self::MissingField(name.to_string())
    }

    pub fn invalid_rating(rating: i64) -> Self {
        Self::InvalidRecord(format!("Invalid rating: {}. Must be between 1 and 5", rating))
    }

    pub fn tail_moved(expected: Option<&str>, found: Option<&str>) -> Self {
        Self::AppendConflict(format!(
            "Ledger tail moved: expected {}, found {}",
            expected.unwrap_or("<empty>"),
            found.unwrap_or("<empty>")
        ))
    }

    /// Whether the builder may re-read the tail and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AppendConflict(_))
    }
}
