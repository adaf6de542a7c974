//! Common error types for Cadence

use thiserror::Error;

/// Common result type for Cadence operations
pub type Result<T> = std::result::Result<T, Error>;

/// SQLite primary result code for SQLITE_BUSY
const SQLITE_BUSY: i64 = 5;
/// SQLite primary result code for SQLITE_LOCKED (shared-cache table locks)
const SQLITE_LOCKED: i64 = 6;

/// Common error types across Cadence components
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Lock conflict that persisted through every retry attempt
    #[error("Write contention on '{operation}' after {attempts} attempts")]
    WriteContention { operation: String, attempts: u32 },

    /// No pooled connection became available within the retry budget
    #[error("Connection pool exhausted on '{operation}' after {attempts} attempts")]
    PoolExhausted { operation: String, attempts: u32 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for transient SQLite lock conflicts (BUSY / LOCKED)
    pub fn is_contention(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                let code_matches = db_err
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
                    .unwrap_or(false);
                let message = db_err.message();
                code_matches
                    || message.contains("database is locked")
                    || message.contains("database table is locked")
            }
            _ => false,
        }
    }

    /// True when the pool could not hand out a connection in time
    pub fn is_pool_timeout(&self) -> bool {
        matches!(self, Error::Database(sqlx::Error::PoolTimedOut))
    }

    /// True when the error should stop the surrounding job rather than
    /// being counted against a single file.
    pub fn aborts_job(&self) -> bool {
        matches!(
            self,
            Error::WriteContention { .. } | Error::PoolExhausted { .. }
        ) || matches!(self, Error::Database(sqlx::Error::PoolClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_classification() {
        let err = Error::Database(sqlx::Error::PoolTimedOut);
        assert!(err.is_pool_timeout());
        assert!(!err.is_contention());
        assert!(!err.aborts_job());
    }

    #[test]
    fn test_exhausted_errors_abort_job() {
        let contention = Error::WriteContention {
            operation: "tracks::insert".to_string(),
            attempts: 5,
        };
        let exhausted = Error::PoolExhausted {
            operation: "tracks::lookup".to_string(),
            attempts: 5,
        };
        assert!(contention.aborts_job());
        assert!(exhausted.aborts_job());
        assert!(!Error::NotFound("track 7".to_string()).aborts_job());
    }

    #[test]
    fn test_error_messages_name_operation() {
        let err = Error::WriteContention {
            operation: "features::upsert".to_string(),
            attempts: 3,
        };
        let message = err.to_string();
        assert!(message.contains("features::upsert"));
        assert!(message.contains("3 attempts"));
    }
}
