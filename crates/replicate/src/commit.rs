//! Committing uploads to authoritative storage.

use crate::content_hash;
use crate::error::{ErrorKind, Result, reason};
use crate::filename::{AllowedExtensions, sanitize};
use billsync_status::{FileRecord, Repository};
use billsync_storage::{BackendHandle, validate_file_name};
use exn::ResultExt;
use tokio::sync::Mutex;
use tracing::instrument;

/// Accepts uploads and commits them to authoritative storage.
///
/// A commit writes the blob durably first and registers its status record
/// second, so a record never points at bytes that aren't there. Commits are
/// serialized: two uploads of the same filename can't interleave their blob
/// and record writes.
pub struct Writer {
    primary: BackendHandle,
    status: Repository,
    extensions: AllowedExtensions,
    /// Every configured target; all start out as not replicated.
    targets: Vec<String>,
    commit_lock: Mutex<()>,
}

impl Writer {
    pub fn new(primary: BackendHandle, status: Repository, extensions: AllowedExtensions, targets: Vec<String>) -> Self {
        Self {
            primary,
            status,
            extensions,
            targets,
            commit_lock: Mutex::new(()),
        }
    }

    /// Commit `data` under (the sanitised form of) `filename`.
    ///
    /// Any previous blob and record with the same name are replaced, and
    /// every replica flag starts over as not replicated.
    ///
    /// # Errors
    /// - [`InvalidFilename`](ErrorKind::InvalidFilename) for an empty or
    ///   unusable name.
    /// - [`UnsupportedType`](ErrorKind::UnsupportedType) when the extension
    ///   isn't allowed.
    /// - [`WriteFailed`](ErrorKind::WriteFailed) when authoritative storage
    ///   refused the blob; nothing was recorded.
    /// - [`StoreUnavailable`](ErrorKind::StoreUnavailable) when the record
    ///   couldn't be written; the blob has been removed again.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn commit(&self, filename: &str, data: &[u8]) -> Result<FileRecord> {
        let name = sanitize(filename)?;
        self.extensions.check(&name)?;
        let path = validate_file_name(&name).or_raise(|| ErrorKind::InvalidFilename(filename.to_string()))?;
        let record = FileRecord::new(&name, data.len() as u64, content_hash(data));

        let _guard = self.commit_lock.lock().await;
        if let Err(e) = self.primary.write(&path, data).await {
            let why = reason(&e);
            tracing::warn!(filename = %name, error = %why, "Authoritative write failed");
            return Err(e).or_raise(|| ErrorKind::WriteFailed(name.clone(), why));
        }
        if let Err(e) = self.status.upsert(&record, &self.targets).await {
            tracing::error!(filename = %name, error = %reason(&e), "Could not record commit; removing blob");
            // Best effort; reconcile drops or re-adopts whatever is left behind.
            if let Err(cleanup) = self.primary.delete(&path).await {
                tracing::warn!(filename = %name, error = %reason(&cleanup), "Could not remove unrecorded blob");
            }
            return Err(e).or_raise(|| ErrorKind::StoreUnavailable);
        }
        tracing::info!(filename = %name, hash = %record.content_hash, "Committed file");
        Ok(record)
    }

    pub fn extensions(&self) -> &AllowedExtensions {
        &self.extensions
    }
}
