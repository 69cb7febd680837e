//! Replication pipeline error types.
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. The failing dependency (storage
//! backend, status store, child process) is kept in the error tree below the
//! [`ErrorKind`] describing what the pipeline was doing.

use derive_more::{Display, Error};
use std::time::Duration;

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Caller errors (surface directly)
/// - [`ErrorKind::UnsupportedType`]
/// - [`ErrorKind::InvalidFilename`]
/// - [`ErrorKind::NotFound`]
/// - [`ErrorKind::UnknownTarget`]
///
/// ### Authoritative storage and status store (fatal to the operation)
/// - [`ErrorKind::WriteFailed`]
/// - [`ErrorKind::ReadFailed`]
/// - [`ErrorKind::StoreUnavailable`]
///
/// ### Replication (recorded against the target, retried later)
/// - [`ErrorKind::TargetUnreachable`]
/// - [`ErrorKind::CopyFailed`]
/// - [`ErrorKind::Timeout`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The file extension is not in the allow-set.
    #[display("unsupported file type: {_0}")]
    UnsupportedType(#[error(not(source))] String),
    /// The filename is empty or nothing is left of it after sanitising.
    #[display("invalid filename: {_0:?}")]
    InvalidFilename(#[error(not(source))] String),
    /// Authoritative storage refused the blob (full, permissions, I/O).
    #[display("could not write {_0} to authoritative storage: {_1}")]
    WriteFailed(#[error(not(source))] String, #[error(not(source))] String),
    /// Authoritative storage could not be read.
    #[display("could not read {_0} from authoritative storage: {_1}")]
    ReadFailed(#[error(not(source))] String, #[error(not(source))] String),
    /// The replication target can't be reached right now (media unplugged,
    /// sync tool not installed). Expected; not escalated.
    #[display("target {_0} unreachable: {_1}")]
    TargetUnreachable(#[error(not(source))] String, #[error(not(source))] String),
    /// The copy to a reachable target failed.
    #[display("copy to {_0} failed: {_1}")]
    CopyFailed(#[error(not(source))] String, #[error(not(source))] String),
    /// The status database could not be read or written.
    #[display("status store unavailable")]
    StoreUnavailable,
    /// No committed file by that name.
    #[display("file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// An operation exceeded its time budget; treated like a failed copy.
    #[display("{_0} timed out after {}s", _1.as_secs())]
    Timeout(#[error(not(source))] String, #[error(not(source))] Duration),
    /// A replication target was requested that is not configured.
    #[display("unknown replication target: {_0}")]
    UnknownTarget(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TargetUnreachable(..)
                | ErrorKind::CopyFailed(..)
                | ErrorKind::Timeout(..)
                | ErrorKind::StoreUnavailable
                | ErrorKind::ReadFailed(..)
        )
    }

    /// Returns `true` for errors caused by what the caller asked for rather
    /// than by the system failing.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnsupportedType(_)
                | ErrorKind::InvalidFilename(_)
                | ErrorKind::NotFound(_)
                | ErrorKind::UnknownTarget(_)
        )
    }
}

/// One-line description of a dependency error, for bookkeeping and messages.
pub(crate) fn reason<E>(err: &exn::Exn<E>) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    (**err).to_string()
}
