//! Periodic retrying of pending replicas.
//!
//! [`sync()`] does the work of one run as a stream of progress events;
//! [`Scheduler`] runs it on an interval, never two at a time.

mod scheduler;
mod stream;

pub use self::scheduler::{Scheduler, SchedulerHandle, SyncReport, SyncRun};
pub use self::stream::{FileSync, SyncEvent, sync};
use std::time::Duration;

/// Knobs for the sync scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Time between two scheduled runs.
    pub interval: Duration,
    /// Upper bound for all the target attempts of a single file in one run.
    pub file_budget: Duration,
    /// Files worked on at the same time.
    pub concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            file_budget: Duration::from_secs(120),
            concurrency: 4,
        }
    }
}
