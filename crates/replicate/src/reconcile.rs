//! Bringing the status store back in line with authoritative storage.
//!
//! A commit writes the blob before the record, so a crash in between leaves
//! a blob nobody knows about; an operator deleting or editing files by hand
//! leaves records that no longer describe their blob. [`reconcile`] repairs
//! both. It is meant to run before uploads are accepted.

use crate::content_hash;
use crate::error::{ErrorKind, Result, reason};
use billsync_status::{FileRecord, Repository};
use billsync_storage::{BackendHandle, validate_file_name};
use exn::ResultExt;
use futures::TryStreamExt;
use std::collections::{HashMap, HashSet};

/// Filenames touched by [`reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Blobs without a record that got a fresh one.
    pub adopted: Vec<String>,
    /// Records whose blob changed underneath them; replaced by a fresh one.
    pub refreshed: Vec<String>,
    /// Records whose blob is gone; dropped.
    pub forgotten: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.adopted.is_empty() && self.refreshed.is_empty() && self.forgotten.is_empty()
    }
}

/// Walk authoritative storage and the status store and repair every
/// difference. Fresh records start with every target in `targets` pending,
/// and use the blob's modification time as upload time.
///
/// A blob that can't be read is left alone (and so is its record).
#[tracing::instrument(skip_all)]
pub async fn reconcile(primary: &BackendHandle, status: &Repository, targets: &[String]) -> Result<ReconcileReport> {
    let mut records: HashMap<String, FileRecord> = status
        .list_all()
        .await
        .or_raise(|| ErrorKind::StoreUnavailable)?
        .into_iter()
        .map(|record| (record.filename.clone(), record))
        .collect();
    let mut seen = HashSet::new();
    let mut report = ReconcileReport::default();

    let mut blobs = primary.list_stream();
    loop {
        let info = match blobs.try_next().await {
            Ok(Some(info)) => info,
            Ok(None) => break,
            Err(e) => {
                let why = reason(&e);
                return Err(e).or_raise(|| ErrorKind::ReadFailed("file listing".to_string(), why));
            },
        };
        let Some(filename) = validate_file_name(&info.path).ok().and_then(|p| p.to_str().map(str::to_string)) else {
            tracing::warn!(path = %info.path.display(), "Ignoring unexpected entry in authoritative storage");
            continue;
        };
        seen.insert(filename.clone());

        let data = match primary.read(&info.path).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(%filename, error = %reason(&e), "Could not read blob; leaving it alone");
                continue;
            },
        };
        let hash = content_hash(&data);
        let existing = records.remove(&filename);
        if let Some(record) = &existing
            && record.size == data.len() as u64
            && record.content_hash == hash
        {
            continue;
        }

        let fresh = FileRecord::new(&filename, data.len() as u64, hash).with_uploaded_at(info.modified);
        status.upsert(&fresh, targets).await.or_raise(|| ErrorKind::StoreUnavailable)?;
        if existing.is_some() {
            tracing::warn!(%filename, "Blob changed outside of billsync; replication starts over");
            report.refreshed.push(filename);
        } else {
            tracing::info!(%filename, "Adopted unrecorded blob");
            report.adopted.push(filename);
        }
    }

    let mut missing: Vec<String> = records.into_keys().filter(|filename| !seen.contains(filename)).collect();
    missing.sort();
    for filename in missing {
        status.forget(&filename).await.or_raise(|| ErrorKind::StoreUnavailable)?;
        tracing::warn!(%filename, "Forgot record without a blob");
        report.forgotten.push(filename);
    }

    report.adopted.sort();
    report.refreshed.sort();
    Ok(report)
}
