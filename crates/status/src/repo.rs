//! Repository for file records and their per-target replica flags.
//!
//! Files and replica rows are treated as a unit: a replica row can't exist
//! without its file row, and replacing a file row (re-upload) drops every
//! replica row with it.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{Attempt, FileRecord, FileRow, ReplicaRow, TargetSummary, to_millis};
use exn::ResultExt;
use sqlx::SqlitePool;
use std::collections::HashMap;
use time::OffsetDateTime;
use tracing::instrument;

/// Repository for managing file records in the status database.
///
/// # Guarantees
///
/// - [`upsert`](Self::upsert) replaces the whole record in one transaction.
/// - [`set_flag`](Self::set_flag) is a single-row statement; concurrent flag
///   updates for different targets of one file never interfere, and updates
///   for the same (file, target) serialize with last-write-wins bookkeeping.
/// - A flag never goes from replicated back to pending except through
///   [`upsert`](Self::upsert).
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Create or fully replace the record for `record.filename`.
    ///
    /// Every prior replica row for the filename is dropped. The new rows are
    /// taken from `record.replicas`, and every target in `targets` without an
    /// entry there starts out as not replicated.
    #[instrument(skip_all, fields(filename = %record.filename))]
    pub async fn upsert(&self, record: &FileRecord, targets: &[String]) -> Result<()> {
        let file_row = FileRow::try_from(record)?;
        let mut replica_rows = Vec::with_capacity(targets.len().max(record.replicas.len()));
        for (target, state) in &record.replicas {
            let last_attempt_at = state.last_attempt_at.map(to_millis).transpose()?;
            let last_error = state.last_error.as_deref();
            replica_rows.push((target.as_str(), state.ok, i64::from(state.attempts), last_attempt_at, last_error));
        }
        for target in targets.iter().filter(|t| !record.replicas.contains_key(t.as_str())) {
            replica_rows.push((target.as_str(), false, 0, None, None));
        }

        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        // Cascades to the replica rows.
        sqlx::query(include_str!("../queries/delete_file.sql"))
            .bind(&file_row.filename)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/insert_file.sql"))
            .bind(&file_row.filename)
            .bind(file_row.uploaded_at)
            .bind(file_row.size)
            .bind(&file_row.content_hash)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for (target, ok, attempts, last_attempt_at, last_error) in replica_rows {
            sqlx::query(include_str!("../queries/insert_replica.sql"))
                .bind(&file_row.filename)
                .bind(target)
                .bind(ok)
                .bind(attempts)
                .bind(last_attempt_at)
                .bind(last_error)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::debug!(size = record.size, hash = %record.content_hash, "Recorded file");
        Ok(())
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Record the outcome of one replication attempt of `record` to `target`.
    ///
    /// The update only applies while the stored record still carries
    /// `record.content_hash`: a missing record, or one replaced by a newer
    /// upload, is left untouched. Returns whether a row was written.
    ///
    /// A failed attempt after a successful one bumps the attempt counter but
    /// leaves the flag set.
    pub async fn set_flag(&self, record: &FileRecord, target: &str, attempt: &Attempt) -> Result<bool> {
        let now = to_millis(OffsetDateTime::now_utc())?;
        let result = sqlx::query(include_str!("../queries/set_flag.sql"))
            .bind(&record.filename)
            .bind(target)
            .bind(attempt.is_success())
            .bind(now)
            .bind(attempt.error())
            .bind(&record.content_hash)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let written = result.rows_affected() > 0;
        if !written {
            tracing::debug!(filename = %record.filename, target, "No current record to flag; skipped");
        }
        Ok(written)
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    /// Get the record for a filename.
    pub async fn get(&self, filename: &str) -> Result<Option<FileRecord>> {
        let Some(file) = sqlx::query_as::<_, FileRow>(include_str!("../queries/get_file.sql"))
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?
        else {
            return Ok(None);
        };
        let replicas: Vec<ReplicaRow> = sqlx::query_as(include_str!("../queries/get_replicas.sql"))
            .bind(filename)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        file.into_record(replicas).map(Some)
    }

    /// All records, most recently uploaded first.
    pub async fn list_all(&self) -> Result<Vec<FileRecord>> {
        let files: Vec<FileRow> = sqlx::query_as(include_str!("../queries/list_files.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.attach_replicas(files).await
    }

    /// Records without a confirmed copy on `target`, oldest upload first.
    ///
    /// Whether the authoritative blob still exists is not known here; the
    /// replicate crate's `Propagator::list_pending` adds that check, and a
    /// sync run reports blob-less records as skipped.
    pub async fn list_pending(&self, target: &str) -> Result<Vec<FileRecord>> {
        let files: Vec<FileRow> = sqlx::query_as(include_str!("../queries/list_pending.sql"))
            .bind(target)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.attach_replicas(files).await
    }

    /// Every record missing at least one of `targets`, paired with the
    /// targets it is missing, oldest upload first.
    pub async fn list_pending_targets(&self, targets: &[String]) -> Result<Vec<(FileRecord, Vec<String>)>> {
        let mut records = self.list_all().await?;
        records.reverse();
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let pending = record.pending_targets(targets.iter().map(String::as_str));
                (!pending.is_empty()).then_some((record, pending))
            })
            .collect())
    }

    /// Replication counts for each of `targets`.
    pub async fn summary(&self, targets: &[String]) -> Result<Vec<TargetSummary>> {
        let mut summaries = Vec::with_capacity(targets.len());
        for target in targets {
            let (total, replicated, failing): (i64, i64, i64) = sqlx::query_as(include_str!("../queries/summary.sql"))
                .bind(target)
                .fetch_one(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
            let count = |n: i64| u64::try_from(n).or_raise(|| ErrorKind::InvalidData("count"));
            summaries.push(TargetSummary {
                target: target.clone(),
                replicated: count(replicated)?,
                pending: count(total - replicated)?,
                failing: count(failing)?,
            });
        }
        Ok(summaries)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Drop the record (and its replica rows) for a filename.
    ///
    /// Only for repairing the store when the authoritative blob is gone or a
    /// commit is rolled back; there is no user-facing deletion. Returns
    /// whether a record existed.
    pub async fn forget(&self, filename: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_file.sql"))
            .bind(filename)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn attach_replicas(&self, files: Vec<FileRow>) -> Result<Vec<FileRecord>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<ReplicaRow> = sqlx::query_as(include_str!("../queries/list_replicas.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut by_file: HashMap<String, Vec<ReplicaRow>> = HashMap::new();
        for row in rows {
            by_file.entry(row.filename.clone()).or_default().push(row);
        }
        files
            .into_iter()
            .map(|file| {
                let replicas = by_file.remove(&file.filename).unwrap_or_default();
                file.into_record(replicas)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::Duration;

    const HASH_A: &str = "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262";
    const HASH_B: &str = "5f5d1c8d2b1e1ec0b1a67f8e2f5c9d0aa8bd0c8f1d1e3f0c0b2a19e7d3c4b5a6";

    fn targets() -> Vec<String> {
        vec!["local".to_string(), "usb".to_string(), "cloud".to_string()]
    }

    async fn repo() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db)
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repo = repo().await;
        let record = FileRecord::new("invoice_jan.pdf", 8, HASH_A);
        repo.upsert(&record, &targets()).await.unwrap();
        let stored = repo.get("invoice_jan.pdf").await.unwrap().unwrap();
        assert_eq!(stored.size, 8);
        assert_eq!(stored.content_hash, HASH_A);
        assert_eq!(stored.replicas.len(), 3);
        assert!(stored.replicas.values().all(|r| !r.ok && r.attempts == 0));
        assert!(repo.get("receipt.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_initial_flags() {
        let repo = repo().await;
        let mut record = FileRecord::new("invoice_jan.pdf", 8, HASH_A);
        let local = crate::ReplicaState { ok: true, attempts: 1, ..Default::default() };
        record.replicas.insert("local".to_string(), local);
        repo.upsert(&record, &targets()).await.unwrap();
        let stored = repo.get("invoice_jan.pdf").await.unwrap().unwrap();
        assert!(stored.is_replicated("local"));
        assert!(!stored.is_replicated("usb"));
    }

    #[tokio::test]
    async fn test_set_flag_success_is_monotone() {
        let repo = repo().await;
        let record = FileRecord::new("invoice_jan.pdf", 8, HASH_A);
        repo.upsert(&record, &targets()).await.unwrap();

        assert!(repo.set_flag(&record, "local", &Attempt::Succeeded).await.unwrap());
        assert!(repo.set_flag(&record, "local", &Attempt::Failed("disk full".to_string())).await.unwrap());

        let local = repo.get("invoice_jan.pdf").await.unwrap().unwrap().replica("local").cloned().unwrap();
        assert!(local.ok, "a failure must not clear a confirmed copy");
        assert_eq!(local.attempts, 2);
        assert_eq!(local.last_error.as_deref(), Some("disk full"));
        assert!(local.last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_set_flag_targets_are_independent() {
        let repo = repo().await;
        let record = FileRecord::new("invoice_jan.pdf", 8, HASH_A);
        repo.upsert(&record, &targets()).await.unwrap();
        repo.set_flag(&record, "local", &Attempt::Succeeded).await.unwrap();
        repo.set_flag(&record, "usb", &Attempt::Unreachable("/media/usb".to_string())).await.unwrap();

        let stored = repo.get("invoice_jan.pdf").await.unwrap().unwrap();
        assert!(stored.is_replicated("local"));
        assert!(!stored.is_replicated("usb"));
        assert!(!stored.is_replicated("cloud"));
        assert_eq!(stored.replica("usb").unwrap().last_error.as_deref(), Some("unreachable: /media/usb"));
        assert_eq!(stored.replica("cloud").unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_set_flag_absent_record_is_noop() {
        let repo = repo().await;
        let record = FileRecord::new("ghost.pdf", 8, HASH_A);
        assert!(!repo.set_flag(&record, "local", &Attempt::Succeeded).await.unwrap());
        assert!(repo.get("ghost.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_flag_ignores_superseded_upload() {
        let repo = repo().await;
        let first = FileRecord::new("invoice_jan.pdf", 8, HASH_A);
        repo.upsert(&first, &targets()).await.unwrap();
        let second = FileRecord::new("invoice_jan.pdf", 9, HASH_B);
        repo.upsert(&second, &targets()).await.unwrap();

        // A late copy of the first upload finishes.
        assert!(!repo.set_flag(&first, "cloud", &Attempt::Succeeded).await.unwrap());
        assert!(!repo.get("invoice_jan.pdf").await.unwrap().unwrap().is_replicated("cloud"));
    }

    #[tokio::test]
    async fn test_reupload_resets_flags() {
        let repo = repo().await;
        let first = FileRecord::new("invoice_jan.pdf", 8, HASH_A);
        repo.upsert(&first, &targets()).await.unwrap();
        for target in targets() {
            repo.set_flag(&first, &target, &Attempt::Succeeded).await.unwrap();
        }
        let second = FileRecord::new("invoice_jan.pdf", 9, HASH_B);
        repo.upsert(&second, &targets()).await.unwrap();

        let stored = repo.get("invoice_jan.pdf").await.unwrap().unwrap();
        assert_eq!(stored.size, 9);
        assert!(stored.replicas.values().all(|r| !r.ok && r.attempts == 0));
    }

    #[rstest]
    #[case("local", &["receipt.png"])]
    #[case("usb", &["invoice_jan.pdf", "receipt.png"])]
    // Configured after the records were written
    #[case("nas", &["invoice_jan.pdf", "receipt.png"])]
    #[tokio::test]
    async fn test_list_pending(#[case] target: &str, #[case] expected: &[&str]) {
        let repo = repo().await;
        let now = OffsetDateTime::now_utc();
        let older = FileRecord::new("invoice_jan.pdf", 8, HASH_A).with_uploaded_at(now - Duration::hours(1));
        let newer = FileRecord::new("receipt.png", 4, HASH_B).with_uploaded_at(now);
        repo.upsert(&older, &targets()).await.unwrap();
        repo.upsert(&newer, &targets()).await.unwrap();
        repo.set_flag(&older, "local", &Attempt::Succeeded).await.unwrap();

        let pending: Vec<_> = repo.list_pending(target).await.unwrap().into_iter().map(|r| r.filename).collect();
        assert_eq!(pending, expected);
    }

    #[tokio::test]
    async fn test_list_all_newest_first() {
        let repo = repo().await;
        let now = OffsetDateTime::now_utc();
        for (i, name) in ["a.pdf", "b.pdf", "c.pdf"].into_iter().enumerate() {
            let record = FileRecord::new(name, 1, HASH_A).with_uploaded_at(now + Duration::minutes(i as i64));
            repo.upsert(&record, &targets()).await.unwrap();
        }
        let names: Vec<_> = repo.list_all().await.unwrap().into_iter().map(|r| r.filename).collect();
        assert_eq!(names, ["c.pdf", "b.pdf", "a.pdf"]);
    }

    #[tokio::test]
    async fn test_list_pending_targets() {
        let repo = repo().await;
        let done = FileRecord::new("done.pdf", 1, HASH_A);
        let partial = FileRecord::new("partial.pdf", 1, HASH_B);
        repo.upsert(&done, &targets()).await.unwrap();
        repo.upsert(&partial, &targets()).await.unwrap();
        for target in targets() {
            repo.set_flag(&done, &target, &Attempt::Succeeded).await.unwrap();
        }
        repo.set_flag(&partial, "local", &Attempt::Succeeded).await.unwrap();

        let pending = repo.list_pending_targets(&targets()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.filename, "partial.pdf");
        assert_eq!(pending[0].1, vec!["usb", "cloud"]);
    }

    #[tokio::test]
    async fn test_forget() {
        let repo = repo().await;
        let record = FileRecord::new("invoice_jan.pdf", 8, HASH_A);
        repo.upsert(&record, &targets()).await.unwrap();
        assert!(repo.forget("invoice_jan.pdf").await.unwrap());
        assert!(!repo.forget("invoice_jan.pdf").await.unwrap());
        assert!(repo.list_all().await.unwrap().is_empty());
        // Replica rows went with it
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM replicas").fetch_one(&repo.pool).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_summary() {
        let repo = repo().await;
        let a = FileRecord::new("a.pdf", 1, HASH_A);
        let b = FileRecord::new("b.pdf", 1, HASH_B);
        repo.upsert(&a, &targets()).await.unwrap();
        repo.upsert(&b, &targets()).await.unwrap();
        repo.set_flag(&a, "local", &Attempt::Succeeded).await.unwrap();
        repo.set_flag(&b, "local", &Attempt::Succeeded).await.unwrap();
        repo.set_flag(&a, "usb", &Attempt::Unreachable("absent".to_string())).await.unwrap();

        let summary = repo.summary(&["local".to_string(), "usb".to_string(), "nas".to_string()]).await.unwrap();
        assert_eq!(summary[0], TargetSummary { target: "local".to_string(), replicated: 2, pending: 0, failing: 0 });
        assert_eq!(summary[1], TargetSummary { target: "usb".to_string(), replicated: 0, pending: 2, failing: 1 });
        assert_eq!(summary[2], TargetSummary { target: "nas".to_string(), replicated: 0, pending: 2, failing: 0 });
    }
}
