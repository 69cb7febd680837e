//! Multi-tier file replication.
//!
//! An upload is committed to authoritative storage by the [`Writer`], then
//! copied on a best-effort basis to every configured replication target by
//! the [`Propagator`]. Local and removable targets are attempted right after
//! the upload; remote ones, and anything that failed, are retried by the
//! [`Scheduler`]. Downloads are always served from authoritative storage by
//! the [`Gateway`].
//!
//! Which target holds a confirmed copy of which file is tracked in the status
//! store ([`billsync_status::Repository`]). A flag only ever turns true after
//! a successful copy and only a new upload of the same filename resets it.

mod commit;
pub mod error;
mod fetch;
pub mod filename;
mod propagate;
mod reconcile;
pub mod sync;
pub mod target;

pub use crate::commit::Writer;
pub use crate::fetch::Gateway;
pub use crate::filename::AllowedExtensions;
pub use crate::propagate::{Outcome, Propagator, TargetReport};
pub use crate::reconcile::{ReconcileReport, reconcile};
pub use crate::sync::{Scheduler, SchedulerHandle, SyncReport, SyncRun, SyncSettings};
pub use crate::target::{ReplicationTarget, TargetHandle, Targets, Tier};

/// BLAKE3 hash of `data` as lowercase hex, as stored on a
/// [`FileRecord`](billsync_status::FileRecord).
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
