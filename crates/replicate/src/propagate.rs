//! Copying committed files to replication targets.

use crate::content_hash;
use crate::error::{Error, ErrorKind, Result, reason};
use crate::target::{Reachability, TargetHandle, Targets};
use billsync_status::{Attempt, FileRecord, Repository};
use billsync_storage::{BackendHandle, validate_file_name};
use derive_more::Display;
use exn::{OptionExt, ResultExt};
use futures::future::join_all;
use std::time::Duration;
use tracing::instrument;

/// What happened to one target during [`Propagator::propagate`].
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The target now holds a byte-for-byte copy.
    #[display("replicated")]
    Replicated,
    /// The record already showed a confirmed copy; nothing was done.
    #[display("already replicated")]
    AlreadyReplicated,
    /// The target couldn't be reached; no copy was attempted.
    #[display("unreachable: {_0}")]
    Unreachable(String),
    #[display("failed: {_0}")]
    Failed(String),
    /// The attempt exceeded the per-attempt timeout and was abandoned.
    #[display("timed out")]
    TimedOut,
}

impl Outcome {
    /// The target holds a confirmed copy after this attempt.
    pub fn is_replicated(&self) -> bool {
        matches!(self, Outcome::Replicated | Outcome::AlreadyReplicated)
    }

    fn attempt(&self, timeout: Duration) -> Option<Attempt> {
        match self {
            Outcome::Replicated => Some(Attempt::Succeeded),
            Outcome::AlreadyReplicated => None,
            Outcome::Unreachable(why) => Some(Attempt::Unreachable(why.clone())),
            Outcome::Failed(why) => Some(Attempt::Failed(why.clone())),
            Outcome::TimedOut => Some(Attempt::Failed(format!("timed out after {}s", timeout.as_secs()))),
        }
    }
}

/// Per-target result of a propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub target: String,
    pub outcome: Outcome,
}

/// Copies committed files from authoritative storage to replication targets.
///
/// Targets are independent: each one is checked, copied and flagged on its
/// own, concurrently with the others, and no target's failure affects
/// another target or the authoritative copy.
pub struct Propagator {
    primary: BackendHandle,
    status: Repository,
    targets: Targets,
    attempt_timeout: Duration,
}

impl Propagator {
    pub fn new(primary: BackendHandle, status: Repository, targets: Targets, attempt_timeout: Duration) -> Self {
        Self {
            primary,
            status,
            targets,
            attempt_timeout,
        }
    }

    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    pub fn primary(&self) -> &BackendHandle {
        &self.primary
    }

    pub fn status(&self) -> &Repository {
        &self.status
    }

    /// Replicate the committed file `filename` to `targets`.
    ///
    /// Per-target failures are reported in the returned list, never as an
    /// error. Safe to repeat: targets already holding a confirmed copy are
    /// reported as [`AlreadyReplicated`](Outcome::AlreadyReplicated).
    ///
    /// # Errors
    /// - [`NotFound`](ErrorKind::NotFound) if no such file was committed.
    /// - [`UnknownTarget`](ErrorKind::UnknownTarget) if a target isn't configured.
    /// - [`ReadFailed`](ErrorKind::ReadFailed) if authoritative storage couldn't be read.
    /// - [`StoreUnavailable`](ErrorKind::StoreUnavailable) if the status store failed.
    pub async fn propagate(&self, filename: &str, targets: &[String]) -> Result<Vec<TargetReport>> {
        let record = self
            .status
            .get(filename)
            .await
            .or_raise(|| ErrorKind::StoreUnavailable)?
            .ok_or_raise(|| ErrorKind::NotFound(filename.to_string()))?;
        self.propagate_record(&record, targets).await
    }

    /// Records still missing a confirmed copy on `target` whose authoritative
    /// blob still exists, oldest upload first.
    pub async fn list_pending(&self, target: &str) -> Result<Vec<FileRecord>> {
        if self.targets.get(target).is_none() {
            exn::bail!(ErrorKind::UnknownTarget(target.to_string()));
        }
        let records = self.status.list_pending(target).await.or_raise(|| ErrorKind::StoreUnavailable)?;
        let mut pending = Vec::with_capacity(records.len());
        for record in records {
            let Ok(path) = validate_file_name(&record.filename) else { continue };
            match self.primary.exists(&path).await {
                Ok(true) => pending.push(record),
                Ok(false) => tracing::debug!(filename = %record.filename, "Pending record has no blob"),
                Err(e) => {
                    let why = reason(&e);
                    return Err(e).or_raise(|| ErrorKind::ReadFailed(record.filename.clone(), why));
                },
            }
        }
        Ok(pending)
    }

    /// Replicate to the local and removable targets, as done right after an
    /// upload.
    pub async fn propagate_eager(&self, filename: &str) -> Result<Vec<TargetReport>> {
        self.propagate(filename, &self.targets.eager_names()).await
    }

    /// Like [`propagate`](Self::propagate), for a record the caller already
    /// loaded. Flags are only written while the stored record still matches
    /// `record`'s content hash.
    #[instrument(skip_all, fields(filename = %record.filename))]
    pub async fn propagate_record(&self, record: &FileRecord, targets: &[String]) -> Result<Vec<TargetReport>> {
        let handles = targets
            .iter()
            .map(|name| self.targets.get(name).cloned().ok_or_raise(|| ErrorKind::UnknownTarget(name.clone())))
            .collect::<Result<Vec<TargetHandle>>>()?;

        let (done, todo): (Vec<_>, Vec<_>) = handles.into_iter().partition(|t| record.is_replicated(t.name()));
        let mut reports: Vec<TargetReport> = done
            .iter()
            .map(|t| TargetReport { target: t.name().to_string(), outcome: Outcome::AlreadyReplicated })
            .collect();
        if todo.is_empty() {
            return Ok(reports);
        }

        let data = self.read_verified(record).await?;
        let data = data.as_deref();
        let attempted = join_all(todo.iter().map(|target| async move {
            let outcome = match data {
                Some(data) => self.attempt(target, &record.filename, data).await,
                None => Outcome::Failed("authoritative copy changed since it was committed".to_string()),
            };
            // Flagged per target as soon as known, so a caller's deadline
            // can't discard copies that already finished.
            if let Some(attempt) = outcome.attempt(self.attempt_timeout) {
                self.status.set_flag(record, target.name(), &attempt).await.or_raise(|| ErrorKind::StoreUnavailable)?;
            }
            Ok::<_, Error>(TargetReport { target: target.name().to_string(), outcome })
        }))
        .await;
        for report in attempted {
            reports.push(report?);
        }
        Ok(reports)
    }

    /// Authoritative bytes of `record`, or `None` if they no longer hash to
    /// the recorded value (a newer upload replaced them).
    async fn read_verified(&self, record: &FileRecord) -> Result<Option<Vec<u8>>> {
        let path = validate_file_name(&record.filename).or_raise(|| ErrorKind::NotFound(record.filename.clone()))?;
        let data = match self.primary.read(&path).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Err(e).or_raise(|| ErrorKind::NotFound(record.filename.clone())),
            Err(e) => {
                let why = reason(&e);
                return Err(e).or_raise(|| ErrorKind::ReadFailed(record.filename.clone(), why));
            },
        };
        if content_hash(&data) != record.content_hash {
            tracing::warn!(filename = %record.filename, "Authoritative copy no longer matches its record");
            return Ok(None);
        }
        Ok(Some(data))
    }

    async fn attempt(&self, target: &TargetHandle, filename: &str, data: &[u8]) -> Outcome {
        let name = target.name();
        let attempt = async {
            if let Reachability::Unreachable(why) = target.reachable().await {
                return Outcome::Unreachable(why);
            }
            match target.copy(filename, data).await {
                Ok(()) => Outcome::Replicated,
                Err(e) => match &*e {
                    ErrorKind::TargetUnreachable(_, why) => Outcome::Unreachable(why.clone()),
                    _ => Outcome::Failed(reason(&e)),
                },
            }
        };
        let outcome = tokio::time::timeout(self.attempt_timeout, attempt).await.unwrap_or(Outcome::TimedOut);
        match &outcome {
            Outcome::Replicated => tracing::info!(target_name = name, filename, "Replicated"),
            Outcome::Unreachable(why) => {
                tracing::info!(target_name = name, filename, reason = %why, "Target unreachable; will retry");
            },
            Outcome::Failed(why) => tracing::warn!(target_name = name, filename, error = %why, "Replication failed"),
            Outcome::TimedOut => {
                tracing::warn!(target_name = name, filename, timeout = ?self.attempt_timeout, "Replication timed out");
            },
            Outcome::AlreadyReplicated => {},
        }
        outcome
    }
}
