use tally_core::UnknownLabel;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// A guarded update found the record in a different state than expected.
    #[error("Stale state: {0}")]
    StaleState(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<UnknownLabel> for StorageError {
    fn from(e: UnknownLabel) -> Self {
        StorageError::Corrupt(e.to_string())
    }
}

impl StorageError {
    /// Maps a unique-constraint violation to `Conflict`, anything else to `Db`.
    pub(crate) fn on_unique(e: sqlx::Error, what: impl FnOnce() -> String) -> Self {
        match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StorageError::Conflict(what())
            }
            other => StorageError::Db(other),
        }
    }
}
