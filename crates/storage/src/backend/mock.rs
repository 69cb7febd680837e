//! In-memory storage backend for tests.

use super::{BoxSyncRead, FileInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_stream::stream;
use async_trait::async_trait;
use exn::OptionExt;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

struct Blob {
    modified: OffsetDateTime,
    data: Vec<u8>,
}

/// Backend keeping its files in a map, for tests.
///
/// Writes can be made to fail on demand to stand in for a full disk or a
/// revoked credential.
///
/// ```
/// use billsync_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("invoice_jan.pdf", b"%PDF-1.7")]);
/// assert!(backend.exists(Path::new("invoice_jan.pdf")).await?);
///
/// backend.fail_writes(true);
/// assert!(backend.write(Path::new("receipt.png"), b"data...").await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    files: RwLock<HashMap<PathBuf, Blob>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MockBackend {
    /// Backend pre-populated with `files`.
    ///
    /// Panics on a path that fails validation; a broken fixture should fail
    /// the test.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let modified = OffsetDateTime::now_utc();
        let files = files
            .into_iter()
            .map(|(path, data)| {
                let path = path.into();
                match validate_path(&path) {
                    Ok(path) => (path, Blob { modified, data: data.into() }),
                    Err(_) => panic!("MockBackend::with_files: invalid path {}", path.display()),
                }
            })
            .collect();
        Self {
            name: "mock".to_string(),
            files: RwLock::new(files),
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make writes and deletes fail with
    /// [`PermissionDenied`](ErrorKind::PermissionDenied) until switched back.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn writable(&self, path: &Path) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::PermissionDenied(path.to_path_buf()));
        }
        Ok(())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_files(std::iter::empty::<(PathBuf, Vec<u8>)>())
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream(&self) -> FileInfoStream<'_> {
        Box::pin(stream!({
            // Snapshot, so the lock isn't held across yields.
            let listed: Vec<FileInfo> = {
                let files = self.files.read().await;
                files
                    .iter()
                    .map(|(path, blob)| FileInfo::new(path.clone(), blob.data.len() as u64, blob.modified))
                    .collect()
            };
            for info in listed {
                yield Ok(info);
            }
        }))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.files.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let files = self.files.read().await;
        Ok(files.get(&path).ok_or_raise(|| ErrorKind::NotFound(path.clone()))?.data.clone())
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        Ok(Box::new(Cursor::new(self.read(path).await?)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        self.writable(&path)?;
        let blob = Blob { modified: OffsetDateTime::now_utc(), data: data.to_vec() };
        self.files.write().await.insert(path, blob);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.writable(&path)?;
        self.files.write().await.remove(&path).ok_or_raise(|| ErrorKind::NotFound(path.clone()))?;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let files = self.files.read().await;
        let blob = files.get(&path).ok_or_raise(|| ErrorKind::NotFound(path.clone()))?;
        Ok(FileInfo::new(path.clone(), blob.data.len() as u64, blob.modified))
    }
}
