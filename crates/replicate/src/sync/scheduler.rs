use super::{FileSync, SyncEvent, SyncSettings, sync};
use crate::error::{Result, reason};
use crate::propagate::Propagator;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Counts from one completed sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files that had at least one pending target.
    pub files: u64,
    /// Files skipped because their authoritative copy is gone.
    pub skipped: u64,
    /// Files that failed as a whole (timed out, store or read failure).
    pub errors: u64,
    /// (file, target) pairs now replicated.
    pub replicated: u64,
    /// (file, target) pairs attempted without success; retried next run.
    pub pending: u64,
}

/// Result of [`Scheduler::run_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRun {
    Completed(SyncReport),
    /// Another run was still in progress; nothing was done.
    Skipped,
}

/// Recurring retry of every pending replica.
///
/// Runs never overlap: a trigger that fires while a run is still active is
/// skipped, not queued. Failures while syncing a file are logged and leave
/// the file pending for the next run; they never end the scheduler.
#[derive(Clone)]
pub struct Scheduler {
    propagator: Arc<Propagator>,
    settings: SyncSettings,
    running: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(propagator: Arc<Propagator>, settings: SyncSettings) -> Self {
        Self {
            propagator,
            settings,
            running: Arc::new(Mutex::new(())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Retry all pending (file, target) pairs once, unless a run is already
    /// in progress.
    ///
    /// Only a failure to discover pending files is returned as an error.
    pub async fn run_once(&self) -> Result<SyncRun> {
        let Ok(_running) = self.running.clone().try_lock_owned() else {
            tracing::info!("Previous sync run still active; skipping");
            return Ok(SyncRun::Skipped);
        };
        if self.shutdown.is_cancelled() {
            return Ok(SyncRun::Skipped);
        }

        let mut report = SyncReport::default();
        let events = sync(&self.propagator, &self.settings, &self.shutdown);
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            match event {
                Ok(SyncEvent::Started) => tracing::debug!("Sync run started"),
                Ok(SyncEvent::DiscoveryComplete(files)) => {
                    tracing::debug!(files, "Discovered pending files");
                    report.files = files;
                },
                Ok(SyncEvent::Synced(FileSync::Skipped { .. })) => report.skipped += 1,
                Ok(SyncEvent::Synced(FileSync::Attempted { reports, .. })) => {
                    for target in reports {
                        if target.outcome.is_replicated() {
                            report.replicated += 1;
                        } else {
                            report.pending += 1;
                        }
                    }
                },
                Ok(SyncEvent::Complete) => {},
                // Nothing was discovered; the run can't go on.
                Err(e) if report.files == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %reason(&e), "File stays pending");
                    report.errors += 1;
                },
            }
        }

        tracing::info!(
            files = report.files,
            replicated = report.replicated,
            pending = report.pending,
            errors = report.errors,
            skipped = report.skipped,
            "Sync run finished"
        );
        Ok(SyncRun::Completed(report))
    }

    /// Run [`run_once`](Self::run_once) every interval, starting right away,
    /// until the returned handle is stopped.
    pub fn start(&self) -> SchedulerHandle {
        let scheduler = self.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs = JoinSet::new();
            loop {
                tokio::select! {
                    biased;
                    _ = scheduler.shutdown.cancelled() => break,
                    Some(_) = runs.join_next(), if !runs.is_empty() => {},
                    _ = ticker.tick() => {
                        // A run of its own, so a slow run doesn't delay the
                        // next tick; that tick gets skipped instead.
                        let run = scheduler.clone();
                        runs.spawn(async move {
                            if let Err(e) = run.run_once().await {
                                tracing::error!(error = %reason(&e), "Sync run failed");
                            }
                        });
                    },
                }
            }
            // Runs spawned before the cancellation must not outlive `stop`.
            while runs.join_next().await.is_some() {}
            tracing::debug!("Sync scheduler stopped");
        });
        SchedulerHandle { shutdown, running: self.running.clone(), task }
    }
}

/// Handle to a started [`Scheduler`].
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    running: Arc<Mutex<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop triggering runs and wait for every spawned run to wind down. An
    /// active run finishes the files it already started.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Sync scheduler task failed");
        }
        drop(self.running.lock().await);
    }
}
