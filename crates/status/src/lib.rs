//! SQLite status store for committed files and their replicas.
//!
//! The store answers one question: which replication targets hold a
//! confirmed copy of which committed file? The blobs themselves live in
//! authoritative storage; a record exists only for a blob that has been
//! durably written there.
//!
//! # Architecture
//! Two tables:
//! - **files**: one row per committed filename with its upload time, size
//!   and BLAKE3 content hash.
//! - **replicas**: one row per (filename, target) with the replicated flag and
//!   attempt bookkeeping (count, last attempt time, last error).
//!
//! A target that has no row for a file (because it was configured later) is
//! treated as not replicated.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{Attempt, FileRecord, ReplicaState, TargetSummary};
pub use crate::repo::Repository;
