use super::{Reachability, ReplicationTarget, Tier};
use crate::error::{ErrorKind, Result, reason};
use async_trait::async_trait;
use billsync_storage::{BackendHandle, validate_file_name};
use exn::ResultExt;

/// A target backed by a [`StorageBackend`](billsync_storage::StorageBackend)
/// that is always there: a fixed local directory or a credentialed object
/// store.
pub struct BackendTarget {
    name: String,
    tier: Tier,
    backend: BackendHandle,
}

impl BackendTarget {
    /// A fixed local directory (always reachable, attempted on upload).
    pub fn local(name: impl Into<String>, backend: BackendHandle) -> Self {
        Self { name: name.into(), tier: Tier::Local, backend }
    }

    /// A remote store with its own client and credentials, left to the sync
    /// scheduler.
    pub fn remote(name: impl Into<String>, backend: BackendHandle) -> Self {
        Self { name: name.into(), tier: Tier::Remote, backend }
    }
}

#[async_trait]
impl ReplicationTarget for BackendTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    async fn reachable(&self) -> Reachability {
        // Configured means reachable; a network outage shows up as a failed copy.
        Reachability::Reachable
    }

    async fn copy(&self, filename: &str, data: &[u8]) -> Result<()> {
        let path = validate_file_name(filename).or_raise(|| ErrorKind::InvalidFilename(filename.to_string()))?;
        if let Err(e) = self.backend.write(&path, data).await {
            let why = reason(&e);
            return Err(e).or_raise(|| ErrorKind::CopyFailed(self.name.clone(), why));
        }
        let stored = match self.backend.stat(&path).await {
            Ok(info) => info,
            Err(e) => {
                let why = reason(&e);
                return Err(e).or_raise(|| ErrorKind::CopyFailed(self.name.clone(), why));
            },
        };
        if stored.size != data.len() as u64 {
            exn::bail!(ErrorKind::CopyFailed(
                self.name.clone(),
                format!("stored {} bytes, expected {}", stored.size, data.len())
            ));
        }
        tracing::trace!(target_name = %self.name, filename, bytes = data.len(), "Copied to backend");
        Ok(())
    }
}
