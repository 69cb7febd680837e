//! Replication targets.
//!
//! A target is anything that can receive a byte-for-byte copy of a committed
//! file: a fixed local directory, a removable drive that may be unplugged, a
//! remote object store reached natively, or an external sync program.

mod backend;
mod command;
mod removable;

pub use self::backend::BackendTarget;
pub use self::command::CommandTarget;
pub use self::removable::RemovableTarget;
use crate::error::Result;
use async_trait::async_trait;
use derive_more::Display;
use std::sync::Arc;

/// Storage tier of a target.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    #[display("local")]
    Local,
    #[display("removable")]
    Removable,
    #[display("remote")]
    Remote,
}

impl Tier {
    /// Eager targets are attempted synchronously right after an upload;
    /// remote targets are left to the sync scheduler.
    pub fn is_eager(self) -> bool {
        matches!(self, Tier::Local | Tier::Removable)
    }
}

/// Answer of a target's reachability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    /// Not reachable right now, with a human-readable reason.
    Unreachable(String),
}

/// A destination for replica copies.
///
/// Implementations never retry internally and never apply their own time
/// limit; both are the caller's business.
#[async_trait]
pub trait ReplicationTarget: Send + Sync {
    /// Name of the target (the key in the configuration), also used as the
    /// target key in the status store.
    fn name(&self) -> &str;

    fn tier(&self) -> Tier;

    /// Cheap check whether a copy could be attempted now.
    async fn reachable(&self) -> Reachability;

    /// Store `data` under `filename`, replacing any previous copy.
    ///
    /// Fails with [`CopyFailed`](crate::error::ErrorKind::CopyFailed), or with
    /// [`TargetUnreachable`](crate::error::ErrorKind::TargetUnreachable) when
    /// the target disappeared after the reachability check.
    async fn copy(&self, filename: &str, data: &[u8]) -> Result<()>;
}

pub type TargetHandle = Arc<dyn ReplicationTarget>;

/// The configured set of replication targets, in configuration order.
#[derive(Clone, Default)]
pub struct Targets {
    targets: Vec<TargetHandle>,
}

impl Targets {
    pub fn new(targets: impl IntoIterator<Item = TargetHandle>) -> Self {
        Self { targets: targets.into_iter().collect() }
    }

    pub fn get(&self, name: &str) -> Option<&TargetHandle> {
        self.targets.iter().find(|t| t.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetHandle> {
        self.targets.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.name().to_string()).collect()
    }

    /// Names of the local and removable targets.
    pub fn eager_names(&self) -> Vec<String> {
        self.targets.iter().filter(|t| t.tier().is_eager()).map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl std::fmt::Debug for Targets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.targets.iter().map(|t| (t.name(), t.tier()))).finish()
    }
}
