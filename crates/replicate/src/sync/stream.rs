use super::SyncSettings;
use crate::error::{ErrorKind, Result};
use crate::propagate::{Propagator, TargetReport};
use async_stream::stream;
use billsync_status::FileRecord;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Progress events emitted by [`sync`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete) exactly once, with the
///    number of files that have at least one pending target.
/// 3. [`Synced`](Self::Synced) zero or more times, one per file.
/// 4. [`Complete`](Self::Complete) exactly once.
///
/// A discovery failure terminates the stream early, in which case
/// [`Complete`](Self::Complete) is never emitted.
#[derive(Debug)]
pub enum SyncEvent {
    Started,
    DiscoveryComplete(u64),
    Synced(FileSync),
    Complete,
}

/// What a run did with one pending file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSync {
    /// The pending targets were attempted.
    Attempted { filename: String, reports: Vec<TargetReport> },
    /// The authoritative blob is gone; nothing to copy.
    Skipped { filename: String },
}

impl FileSync {
    pub fn filename(&self) -> &str {
        match self {
            FileSync::Attempted { filename, .. } | FileSync::Skipped { filename } => filename,
        }
    }
}

/// Streams [`SyncEvent`]s while retrying every pending (file, target) pair.
///
/// Pending files are discovered from the status store, oldest upload first,
/// and each one is propagated to its still-pending targets only, up to
/// `settings.concurrency` files at a time. Every file gets at most
/// `settings.file_budget`; a file that runs over is yielded as a
/// [`Timeout`](ErrorKind::Timeout) error and stays pending.
///
/// Individual file failures are surfaced as `Err` items without terminating
/// the stream; only a discovery failure is fatal. Once `cancel` fires no new
/// files are started, but those in flight run to completion.
pub fn sync<'a>(
    propagator: &'a Propagator,
    settings: &'a SyncSettings,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = Result<SyncEvent>> + 'a {
    // `rustfmt` does not format macros that use braces. Wrap in parentheses!
    stream!({
        yield Ok(SyncEvent::Started);

        let targets = propagator.targets().names();
        let pending = match propagator.status().list_pending_targets(&targets).await {
            Ok(pending) => pending,
            Err(e) => {
                yield Err(e).or_raise(|| ErrorKind::StoreUnavailable);
                return;
            },
        };
        yield Ok(SyncEvent::DiscoveryComplete(u64::try_from(pending.len()).unwrap_or(u64::MAX)));

        let mut futures: Vec<_> = pending
            .into_iter()
            .map(|(record, targets)| sync_file(propagator, record, targets, settings.file_budget))
            .collect();
        let mut processing = FuturesUnordered::new();
        if !cancel.is_cancelled() {
            processing.extend(futures.drain(..settings.concurrency.max(1).min(futures.len())));
        }
        while let Some(result) = processing.next().await {
            yield result.map(SyncEvent::Synced);
            if cancel.is_cancelled() {
                if !futures.is_empty() {
                    tracing::info!(remaining = futures.len(), "Sync cancelled; leaving remaining files for later");
                    futures.clear();
                }
                continue;
            }
            // Pop-n-push, but FIFO instead of LIFO.
            if !futures.is_empty() {
                processing.push(futures.remove(0));
            }
        }

        yield Ok(SyncEvent::Complete);
    })
}

async fn sync_file(
    propagator: &Propagator,
    record: FileRecord,
    targets: Vec<String>,
    budget: Duration,
) -> Result<FileSync> {
    let filename = record.filename.clone();
    let attempt = propagator.propagate_record(&record, &targets);
    match tokio::time::timeout(budget, attempt).await {
        Ok(Ok(reports)) => Ok(FileSync::Attempted { filename, reports }),
        Ok(Err(e)) if matches!(&*e, ErrorKind::NotFound(_)) => {
            tracing::warn!(%filename, "Pending file has no authoritative copy; skipping");
            Ok(FileSync::Skipped { filename })
        },
        Ok(Err(e)) => Err(e),
        Err(_) => {
            tracing::warn!(%filename, ?budget, "File exceeded its sync budget");
            exn::bail!(ErrorKind::Timeout(filename, budget))
        },
    }
}
