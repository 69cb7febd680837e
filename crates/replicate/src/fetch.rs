//! Reading committed files back.

use crate::error::{ErrorKind, Result, reason};
use billsync_storage::{BackendHandle, validate_file_name};
use exn::ResultExt;
use std::io::Read;
use std::path::PathBuf;

/// Serves downloads from authoritative storage only; replicas may lag and
/// are never read.
#[derive(Clone)]
pub struct Gateway {
    primary: BackendHandle,
}

impl Gateway {
    pub fn new(primary: BackendHandle) -> Self {
        Self { primary }
    }

    /// The complete authoritative contents of `filename`.
    ///
    /// # Errors
    /// - [`NotFound`](ErrorKind::NotFound) if there is no such file, including
    ///   for names that could never have been committed.
    /// - [`ReadFailed`](ErrorKind::ReadFailed) if the storage failed to answer.
    pub async fn fetch(&self, filename: &str) -> Result<Vec<u8>> {
        let path = self.path(filename)?;
        match self.primary.read(&path).await {
            Ok(data) => Ok(data),
            Err(e) => self.raise(e, filename),
        }
    }

    /// Like [`fetch`](Self::fetch), but as a blocking reader for streaming
    /// large files out.
    pub async fn open(&self, filename: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.path(filename)?;
        match self.primary.reader(&path).await {
            Ok(reader) => Ok(reader),
            Err(e) => self.raise(e, filename),
        }
    }

    fn path(&self, filename: &str) -> Result<PathBuf> {
        validate_file_name(filename).or_raise(|| ErrorKind::NotFound(filename.to_string()))
    }

    fn raise<T>(&self, err: billsync_storage::error::Error, filename: &str) -> Result<T> {
        if err.is_not_found() {
            return Err(err).or_raise(|| ErrorKind::NotFound(filename.to_string()));
        }
        let why = reason(&err);
        tracing::warn!(filename, error = %why, "Authoritative read failed");
        Err(err).or_raise(|| ErrorKind::ReadFailed(filename.to_string(), why))
    }
}
