//! Status store error types.
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. The underlying `sqlx` error is kept as the source of the
//! raised [`ErrorKind`].

use derive_more::{Display, Error};

/// A status store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for status store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The database could not be reached or a statement failed.
    #[display("status database unavailable")]
    Database,
    #[display("status database migration error")]
    Migration,
    /// A stored value could not be converted to or from its model.
    #[display("invalid status data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// A busy or briefly unavailable database usually recovers; corrupt rows
    /// and failed migrations don't.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Database.is_retryable());
        assert!(!ErrorKind::Migration.is_retryable());
        assert!(!ErrorKind::InvalidData("size").is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::InvalidData("upload time").to_string(), "invalid status data: upload time");
    }
}
