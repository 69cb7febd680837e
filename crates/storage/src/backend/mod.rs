//! The [`StorageBackend`] trait and its implementations.

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::io::Read;
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub(crate) type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// A place blobs can be stored in and read back from.
///
/// One trait covers the authoritative store and every replica, so copying a
/// file between tiers is a [`read`](Self::read) on one handle followed by a
/// [`write`](Self::write) on the other.
///
/// Paths are relative to the backend's root and implementations reject any
/// path that fails [`validate_path`](crate::validate_path).
///
/// ```
/// use std::path::Path;
/// use billsync_storage::{backend::StorageBackend, error::Result};
///
/// async fn mirror(source: &dyn StorageBackend, replica: &dyn StorageBackend, name: &Path) -> Result<u64> {
///     let data = source.read(name).await?;
///     replica.write(name, &data).await?;
///     Ok(replica.stat(name).await?.size)
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Configured name of the backend, for logging.
    fn name(&self) -> &str;

    /// Every stored file, in no particular order.
    async fn list(&self) -> Result<Vec<FileInfo>> {
        self.list_stream().try_collect().await
    }

    /// Every stored file, as it is discovered.
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use billsync_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut files = backend.list_stream();
    /// while let Some(info) = files.try_next().await? {
    ///     println!("{}: {} bytes", info.path.display(), info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream(&self) -> FileInfoStream<'_>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    /// The whole file. [`NotFound`](crate::error::ErrorKind::NotFound) if
    /// there is no such file.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// A blocking reader over the file, for streaming it out from inside
    /// [`spawn_blocking`](tokio::task::spawn_blocking). Opening happens
    /// before this returns, so a missing file is reported here as
    /// [`NotFound`](crate::error::ErrorKind::NotFound).
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Store `data` under `path`, replacing any previous contents.
    ///
    /// Once this returns `Ok` the data is durable, and readers see either
    /// the old or the new contents in full, never a mix.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// [`NotFound`](crate::error::ErrorKind::NotFound) if there is no such
    /// file.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Metadata without the contents. [`NotFound`](crate::error::ErrorKind::NotFound)
    /// if there is no such file.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
