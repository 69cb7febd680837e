use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Status of one committed file in authoritative storage.
///
/// The record exists exactly as long as the blob it describes: it is written
/// after the blob is durable and replaced wholesale when the same filename is
/// uploaded again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Sanitised filename, the key in authoritative storage and every replica.
    pub filename: String,
    /// When the upload was committed (millisecond precision once stored).
    pub uploaded_at: OffsetDateTime,
    pub size: u64,
    /// BLAKE3 hash of the committed bytes, lowercase hex.
    pub content_hash: String,
    /// Replication state keyed by target name. Targets configured after the
    /// record was written have no entry and count as not replicated.
    pub replicas: BTreeMap<String, ReplicaState>,
}

impl FileRecord {
    /// A fresh record, uploaded now, with no replica state.
    pub fn new(filename: impl Into<String>, size: u64, content_hash: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            uploaded_at: OffsetDateTime::now_utc(),
            size,
            content_hash: content_hash.into(),
            replicas: BTreeMap::new(),
        }
    }

    pub fn with_uploaded_at(mut self, uploaded_at: OffsetDateTime) -> Self {
        self.uploaded_at = uploaded_at;
        self
    }

    /// Replica state for a target, if the store has seen it.
    pub fn replica(&self, target: &str) -> Option<&ReplicaState> {
        self.replicas.get(target)
    }

    /// Whether the target holds a confirmed copy.
    pub fn is_replicated(&self, target: &str) -> bool {
        self.replica(target).is_some_and(|r| r.ok)
    }

    /// The given targets that do not hold a confirmed copy yet, in the order
    /// they were given.
    pub fn pending_targets<'a>(&self, targets: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        targets.into_iter().filter(|t| !self.is_replicated(t)).map(str::to_string).collect()
    }
}

/// One (file, target) flag with its attempt bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaState {
    pub ok: bool,
    pub attempts: u32,
    pub last_attempt_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

/// Outcome of one replication attempt, as recorded by
/// [`Repository::set_flag`](crate::Repository::set_flag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The target holds a byte-for-byte copy.
    Succeeded,
    /// The copy was attempted and failed (or timed out).
    Failed(String),
    /// The target could not be reached, so no copy was attempted.
    Unreachable(String),
}

impl Attempt {
    pub fn is_success(&self) -> bool {
        matches!(self, Attempt::Succeeded)
    }

    /// Error text stored alongside the flag.
    pub fn error(&self) -> Option<String> {
        match self {
            Attempt::Succeeded => None,
            Attempt::Failed(reason) => Some(reason.clone()),
            Attempt::Unreachable(reason) => Some(format!("unreachable: {reason}")),
        }
    }
}

/// Per-target replication counts, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSummary {
    pub target: String,
    /// Files with a confirmed copy on this target.
    pub replicated: u64,
    /// Files without a confirmed copy, including ones never attempted.
    pub pending: u64,
    /// Pending files whose last attempt failed.
    pub failing: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        let mut record = FileRecord::new("invoice_jan.pdf", 8, "af1349b9");
        record.replicas.insert("local".to_string(), ReplicaState { ok: true, ..Default::default() });
        record.replicas.insert("usb".to_string(), ReplicaState::default());
        record
    }

    #[test]
    fn test_pending_targets() {
        let record = record();
        assert!(record.is_replicated("local"));
        assert!(!record.is_replicated("usb"));
        // Unknown targets are pending
        assert!(!record.is_replicated("cloud"));
        assert_eq!(record.pending_targets(["local", "usb", "cloud"]), vec!["usb", "cloud"]);
        assert!(record.pending_targets(["local"]).is_empty());
    }

    #[test]
    fn test_attempt_error_text() {
        assert_eq!(Attempt::Succeeded.error(), None);
        assert_eq!(Attempt::Failed("disk full".to_string()).error().as_deref(), Some("disk full"));
        assert_eq!(
            Attempt::Unreachable("/media/usb missing".to_string()).error().as_deref(),
            Some("unreachable: /media/usb missing")
        );
    }
}
