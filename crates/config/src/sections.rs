use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fallback data directory when the platform has no notion of one.
const FALLBACK_DATA_DIR: &str = "/var/lib/billsync";

/// Where authoritative blobs and the status database live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of authoritative storage.
    pub primary: PathBuf,
    /// Path of the SQLite status database.
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = ProjectDirs::from("", "", "billsync")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR));
        Self {
            primary: data_dir.join("files"),
            database: data_dir.join("status.db"),
        }
    }
}

impl StorageConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        require_absolute("storage.primary", &self.primary)?;
        require_absolute("storage.database", &self.database)?;
        if self.database.starts_with(&self.primary) {
            exn::bail!(ErrorKind::Invalid("storage.database must not live inside storage.primary".to_string()));
        }
        Ok(())
    }
}

/// Which uploads are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// File extensions accepted on upload, compared case-insensitively and
    /// without the leading dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: ["pdf", "png", "jpg", "jpeg", "doc", "docx", "txt"].map(String::from).to_vec(),
        }
    }
}

impl UploadConfig {
    /// Lowercase, dot-less, de-duplicated extensions.
    pub fn normalized_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        extensions.sort();
        extensions.dedup();
        extensions
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.normalized_extensions().is_empty() {
            exn::bail!(ErrorKind::Invalid("upload.allowed_extensions must list at least one extension".to_string()));
        }
        Ok(())
    }
}

/// Background synchronisation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between scheduler runs.
    pub interval_secs: u64,
    /// Hard limit on a single copy to a single target.
    pub attempt_timeout_secs: u64,
    /// Hard limit on all pending targets of one file within one run.
    pub file_budget_secs: u64,
    /// Files synchronised in parallel within one run.
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            attempt_timeout_secs: 60,
            file_budget_secs: 120,
            concurrency: 4,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn file_budget(&self) -> Duration {
        Duration::from_secs(self.file_budget_secs)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("sync.interval_secs", self.interval_secs),
            ("sync.attempt_timeout_secs", self.attempt_timeout_secs),
            ("sync.file_budget_secs", self.file_budget_secs),
        ] {
            if value == 0 {
                exn::bail!(ErrorKind::Invalid(format!("{key} must be greater than zero")));
            }
        }
        if self.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("sync.concurrency must be greater than zero".to_string()));
        }
        // A hung copy must be cut off before the next run is due.
        if self.attempt_timeout_secs >= self.interval_secs {
            exn::bail!(ErrorKind::Invalid(
                "sync.attempt_timeout_secs must be shorter than sync.interval_secs".to_string()
            ));
        }
        // Finished copies must get flagged before the file's budget runs out.
        if self.attempt_timeout_secs >= self.file_budget_secs {
            exn::bail!(ErrorKind::Invalid(
                "sync.attempt_timeout_secs must be shorter than sync.file_budget_secs".to_string()
            ));
        }
        Ok(())
    }
}

pub(crate) fn require_absolute(key: &str, path: &Path) -> Result<()> {
    if !path.is_absolute() {
        exn::bail!(ErrorKind::Invalid(format!("{key} must be an absolute path, got {}", path.display())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_normalized_extensions() {
        let upload = UploadConfig {
            allowed_extensions: vec![".PDF".to_string(), "pdf".to_string(), " Txt ".to_string(), ".".to_string()],
        };
        assert_eq!(upload.normalized_extensions(), vec!["pdf", "txt"]);
    }

    #[test]
    fn test_empty_extensions_rejected() {
        let upload = UploadConfig { allowed_extensions: vec![".".to_string()] };
        assert!(upload.validate().is_err());
    }

    #[rstest]
    #[case(SyncConfig { interval_secs: 0, ..Default::default() })]
    #[case(SyncConfig { attempt_timeout_secs: 0, ..Default::default() })]
    #[case(SyncConfig { file_budget_secs: 0, ..Default::default() })]
    #[case(SyncConfig { concurrency: 0, ..Default::default() })]
    #[case(SyncConfig { interval_secs: 30, attempt_timeout_secs: 30, ..Default::default() })]
    #[case(SyncConfig { attempt_timeout_secs: 120, file_budget_secs: 120, ..Default::default() })]
    #[case(SyncConfig { attempt_timeout_secs: 90, file_budget_secs: 60, ..Default::default() })]
    fn test_invalid_sync(#[case] sync: SyncConfig) {
        assert!(sync.validate().is_err());
    }

    #[test]
    fn test_default_sync_is_valid() {
        let sync = SyncConfig::default();
        sync.validate().unwrap();
        assert_eq!(sync.interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_database_inside_primary_rejected() {
        let storage = StorageConfig {
            primary: PathBuf::from("/srv/bills"),
            database: PathBuf::from("/srv/bills/status.db"),
        };
        assert!(storage.validate().is_err());
    }
}
