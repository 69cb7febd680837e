//! Directory-backed storage.
//!
//! Serves the authoritative store, fixed mirrors and removable media alike.
//! For removable media the difference is only the constructor:
//! [`LocalBackend::open_existing`] refuses a missing root, so an unplugged
//! drive is never replaced by an empty directory on the mount point.

use crate::backend::{BoxSyncRead, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use crate::{FileInfo, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Suffix of in-flight writes; never listed.
const PARTIAL_SUFFIX: &str = ".partial";

static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Files under a root directory, addressed by paths relative to it.
///
/// Writes go to a hidden sibling first, are flushed to disk with `fsync`
/// and then renamed over the destination, so readers only ever see complete
/// files and a successful write survives a power cut.
///
/// ```no_run
/// use billsync_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let primary = LocalBackend::new("primary", "/srv/billsync/files")?;
/// let usb = LocalBackend::open_existing("usb", "/media/usb/bills")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}

impl LocalBackend {
    /// Backend rooted at `root`, which is created when missing.
    ///
    /// Fails with [`InvalidPath`](ErrorKind::InvalidPath) for a relative root
    /// or one that exists but isn't a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = absolute(root.as_ref())?;
        if root.exists() && !root.is_dir() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        // Blocking is fine here; this only runs while starting up.
        std::fs::create_dir_all(&root).map_err(|e| map_io_error(e, &root))?;
        Ok(Self { name: name.into(), root })
    }

    /// Backend rooted at `root`, which must already be a directory.
    ///
    /// Fails with [`NotFound`](ErrorKind::NotFound) when it isn't, which for
    /// removable media means "not plugged in".
    pub fn open_existing(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = absolute(root.as_ref())?;
        if !root.is_dir() {
            exn::bail!(ErrorKind::NotFound(root));
        }
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a stored path, after validating it.
    pub fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        Ok(self.root.join(validate_path(path.as_ref())?))
    }

    fn relative_path(&self, absolute: &Path) -> Result<PathBuf> {
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::BackendError(format!("{} is outside of {}", absolute.display(), self.root.display()))
        })?;
        validate_path(relative)
    }

    fn partial_path(destination: &Path) -> PathBuf {
        let counter = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
        let file_name = destination.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        destination.with_file_name(format!(".{file_name}.{}.{counter}{PARTIAL_SUFFIX}", std::process::id()))
    }

    fn is_partial(path: &Path) -> bool {
        path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX))
    }

    /// Walk one directory: files are returned, subdirectories pushed onto
    /// `pending`. In-flight writes and anything that isn't a regular file or
    /// directory (broken symlinks, sockets) are ignored.
    async fn read_directory(&self, dir: &Path, pending: &mut Vec<PathBuf>) -> Result<Vec<FileInfo>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            // Removed while walking.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => exn::bail!(map_io_error(e, dir)),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_io_error(e, dir))? {
            let path = entry.path();
            let metadata = entry.metadata().await.map_err(|e| map_io_error(e, &path))?;
            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() && !Self::is_partial(&path) {
                files.push(file_info(self.relative_path(&path)?, &metadata)?);
            }
        }
        Ok(files)
    }
}

fn absolute(root: &Path) -> Result<PathBuf> {
    if !root.is_absolute() {
        exn::bail!(ErrorKind::InvalidPath(root.to_path_buf()));
    }
    Ok(root.to_path_buf())
}

fn file_info(path: PathBuf, metadata: &Metadata) -> Result<FileInfo> {
    let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
    Ok(FileInfo::new(path, metadata.len(), modified))
}

fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
    match e.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
        std::io::ErrorKind::StorageFull => ErrorKind::StorageFull(path.to_path_buf()),
        _ => ErrorKind::Io(e),
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream(&self) -> FileInfoStream<'_> {
        let mut pending = vec![self.root.clone()];
        Box::pin(stream!({
            while let Some(dir) = pending.pop() {
                match self.read_directory(&dir, &mut pending).await {
                    Ok(files) => {
                        for file in files {
                            yield Ok(file);
                        }
                    },
                    Err(e) => yield Err(e),
                }
            }
        }))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let absolute = self.absolute_path(path)?;
        Ok(fs::try_exists(&absolute).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let absolute = self.absolute_path(path)?;
        Ok(fs::read(&absolute).await.map_err(|e| map_io_error(e, path))?)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let absolute = self.absolute_path(path)?;
        let file = fs::File::open(&absolute).await.map_err(|e| map_io_error(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let absolute = self.absolute_path(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(|e| map_io_error(e, path))?;
        }
        let partial = Self::partial_path(&absolute);
        let written = match write_synced(&partial, data).await {
            Ok(()) => fs::rename(&partial, &absolute).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            _ = fs::remove_file(&partial).await;
            exn::bail!(map_io_error(e, path));
        }
        tracing::trace!(backend = %self.name, path = %path.display(), bytes = data.len(), "Wrote file");
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let absolute = self.absolute_path(path)?;
        Ok(fs::remove_file(&absolute).await.map_err(|e| map_io_error(e, path))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let absolute = self.absolute_path(path)?;
        let metadata = fs::metadata(&absolute).await.map_err(|e| map_io_error(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        file_info(path.to_path_buf(), &metadata)
    }
}
