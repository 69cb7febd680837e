use super::{Reachability, ReplicationTarget, Tier};
use crate::error::{ErrorKind, Result, reason};
use async_trait::async_trait;
use billsync_storage::backend::LocalBackend;
use billsync_storage::{StorageBackend, validate_file_name};
use exn::ResultExt;
use std::path::{Path, PathBuf};

/// A directory on media that comes and goes (USB drive, SD card, network
/// mount).
///
/// The directory is never created: if it isn't there, the media isn't
/// plugged in, and writing would fill up the mount point on the host disk
/// instead.
pub struct RemovableTarget {
    name: String,
    root: PathBuf,
}

impl RemovableTarget {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unreachable(&self) -> String {
        format!("{} is not mounted", self.root.display())
    }
}

#[async_trait]
impl ReplicationTarget for RemovableTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> Tier {
        Tier::Removable
    }

    async fn reachable(&self) -> Reachability {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Reachability::Reachable,
            _ => Reachability::Unreachable(self.unreachable()),
        }
    }

    async fn copy(&self, filename: &str, data: &[u8]) -> Result<()> {
        let path = validate_file_name(filename).or_raise(|| ErrorKind::InvalidFilename(filename.to_string()))?;
        // Re-opened for every copy; the media may have been swapped since.
        let backend = match LocalBackend::open_existing(&self.name, &self.root) {
            Ok(backend) => backend,
            Err(e) if e.is_not_found() => {
                return Err(e).or_raise(|| ErrorKind::TargetUnreachable(self.name.clone(), self.unreachable()));
            },
            Err(e) => {
                let why = reason(&e);
                return Err(e).or_raise(|| ErrorKind::CopyFailed(self.name.clone(), why));
            },
        };
        if let Err(e) = backend.write(&path, data).await {
            let why = reason(&e);
            return Err(e).or_raise(|| ErrorKind::CopyFailed(self.name.clone(), why));
        }
        Ok(())
    }
}
