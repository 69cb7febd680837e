//! Configuration loading and validation.
//!
//! Configuration is layered with [`figment`], later layers overriding earlier
//! ones:
//!
//! 1. compiled defaults ([`Config::default`]);
//! 2. `billsync.toml` / `billsync.yaml` in the platform configuration
//!    directory, or the single file passed explicitly;
//! 3. environment variables prefixed `BILLSYNC_`, with `__` separating
//!    nested keys (`BILLSYNC_SYNC__INTERVAL_SECS=60`).
//!
//! The result is validated once and treated as immutable afterwards.

pub mod error;
mod sections;
mod targets;

pub use crate::sections::{StorageConfig, SyncConfig, UploadConfig};
pub use crate::targets::TargetConfig;
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "BILLSYNC_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub sync: SyncConfig,
    /// Replication targets by name.
    pub targets: BTreeMap<String, TargetConfig>,
}

impl Config {
    /// Load and validate configuration.
    ///
    /// With `path`, that file must exist and replaces the platform default
    /// files; its format follows its extension (`.yaml`/`.yml`, `.json`,
    /// anything else is TOML).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path
            && !path.is_file()
        {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::from_figment(&Self::figment(path))
    }

    /// The layered providers, without extracting.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Using configuration file");
                figment = match path.extension().and_then(|ext| ext.to_str()) {
                    Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                    Some("json") => figment.merge(Json::file(path)),
                    _ => figment.merge(Toml::file(path)),
                };
            },
            None => {
                if let Some(dir) = Self::config_dir() {
                    figment = figment
                        .merge(Toml::file(dir.join("billsync.toml")))
                        .merge(Yaml::file(dir.join("billsync.yaml")));
                }
            },
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate from an arbitrary figment.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Platform configuration directory, e.g. `~/.config/billsync` on Linux.
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "billsync").map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.upload.validate()?;
        self.sync.validate()?;
        for (name, target) in &self.targets {
            targets::validate_name(name)?;
            target.validate(name)?;
            if let TargetConfig::Local { path } | TargetConfig::Removable { path } = target
                && (path.starts_with(&self.storage.primary) || self.storage.primary.starts_with(path))
            {
                exn::bail!(ErrorKind::Invalid(format!(
                    "targets.{name}.path must not overlap storage.primary ({})",
                    self.storage.primary.display()
                )));
            }
        }
        Ok(())
    }

    /// Target names in configuration order.
    pub fn target_names(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    const EXAMPLE: &str = r#"
        [storage]
        primary = "/srv/billsync/files"
        database = "/srv/billsync/status.db"

        [upload]
        allowed_extensions = ["pdf", "png"]

        [sync]
        interval_secs = 600

        [targets.local]
        kind = "local"
        path = "/srv/backup/bills"

        [targets.usb]
        kind = "removable"
        path = "/media/usb/bills"

        [targets.cloud]
        kind = "s3"
        bucket = "bills"
        region = "us-west-004"
        endpoint = "https://s3.us-west-004.backblazeb2.com"
        key_id = "id"
        key_secret = "secret"
    "#;

    fn from_toml(toml: &str) -> Result<Config> {
        Config::from_figment(&Figment::from(Serialized::defaults(Config::default())).merge(Toml::string(toml)))
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.upload.normalized_extensions(), ["doc", "docx", "jpeg", "jpg", "pdf", "png", "txt"]);
        assert!(config.targets.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_example_file() {
        let config = from_toml(EXAMPLE).unwrap();
        assert_eq!(config.sync.interval_secs, 600);
        // Untouched keys keep their defaults
        assert_eq!(config.sync.attempt_timeout_secs, 60);
        assert_eq!(config.target_names(), ["cloud", "local", "usb"]);
        assert_eq!(
            config.targets["usb"],
            TargetConfig::Removable { path: PathBuf::from("/media/usb/bills") }
        );
        assert!(matches!(&config.targets["cloud"], TargetConfig::S3 { prefix: None, .. }));
    }

    #[rstest]
    #[case("[targets.usb]\nkind = \"floppy\"\npath = \"/mnt/a\"")]
    #[case("[targets.usb]\nkind = \"removable\"\npath = \"mnt/a\"")]
    #[case("[targets.\"bad name\"]\nkind = \"local\"\npath = \"/mnt/a\"")]
    #[case("[sync]\ninterval_secs = 0")]
    #[case("[upload]\nallowed_extensions = []")]
    #[case("[sync]\ninterval_secs = \"soon\"")]
    fn test_invalid(#[case] toml: &str) {
        assert!(from_toml(toml).is_err());
    }

    #[test]
    fn test_target_overlapping_primary_rejected() {
        let toml = r#"
            [storage]
            primary = "/srv/billsync/files"
            database = "/srv/billsync/status.db"
            [targets.mirror]
            kind = "local"
            path = "/srv/billsync/files/mirror"
        "#;
        let err = from_toml(toml).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/billsync.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file("billsync.yaml", "sync:\n  interval_secs: 900\n  concurrency: 2\n")?;
            jail.set_env("BILLSYNC_SYNC__INTERVAL_SECS", "120");
            jail.set_env("BILLSYNC_TARGETS__USB__KIND", "removable");
            jail.set_env("BILLSYNC_TARGETS__USB__PATH", "/media/usb");
            let path = jail.directory().join("billsync.yaml");
            let config = Config::load(Some(&path)).map_err(|e| e.to_string())?;
            // Environment wins over the file, the file over defaults.
            assert_eq!(config.sync.interval_secs, 120);
            assert_eq!(config.sync.concurrency, 2);
            assert_eq!(config.targets["usb"], TargetConfig::Removable { path: PathBuf::from("/media/usb") });
            Ok(())
        });
    }
}
