//! Errors raised by storage backends.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong, at the granularity callers branch on: a missing file is
/// routine, a full disk needs a human, a dropped connection can be retried.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Filesystem permissions, or credentials the remote rejected.
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    #[display("storage full: {}", _0.display())]
    StorageFull(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Fails [`validate_path`](crate::validate_path).
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Anything else the remote reported.
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// A later attempt could plausibly succeed without anyone intervening.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendError(_))
    }

    /// The file isn't there, as opposed to the backend failing to answer.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ErrorKind::Network("reset".to_string()).is_retryable());
        assert!(ErrorKind::Io(IoError::other("disk")).is_retryable());
        assert!(!ErrorKind::NotFound(PathBuf::from("a.pdf")).is_retryable());
        assert!(!ErrorKind::StorageFull(PathBuf::from("a.pdf")).is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::NotFound(PathBuf::from("bills/a.pdf")).to_string(), "file not found: bills/a.pdf");
        assert_eq!(ErrorKind::Network("timed out".to_string()).to_string(), "network error: timed out");
    }
}
