//! Blob storage backends.
//!
//! Every tier of the replication pipeline (the authoritative store, fixed
//! local mirrors, removable media and S3-compatible object stores) is reached
//! through the same [`StorageBackend`] trait, keyed by relative paths that
//! have passed through [`validate_path`].

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::{validate as validate_path, validate_file_name};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
