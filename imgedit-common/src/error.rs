//! Storage-layer error type shared by imgedit crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised below the engine: database, filesystem and configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML could not be read, parsed or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// A row the caller expected to exist is gone
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when SQLite reported lock contention, which is safe to retry
    pub fn is_lock_contention(&self) -> bool {
        let Error::Database(db_err) = self else {
            return false;
        };
        let msg = db_err.to_string();
        msg.contains("database is locked") || msg.contains("database table is locked")
    }
}
