use crate::error::{ErrorKind, Result};
use crate::sections::require_absolute;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One replication target, keyed by its name in the `targets` table.
///
/// ```toml
/// [targets.usb]
/// kind = "removable"
/// path = "/media/usb/bills"
///
/// [targets.cloud]
/// kind = "command"
/// program = "rclone"
/// args = ["copyto", "{source}", "remote:bills/{name}"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetConfig {
    /// A directory that is always there; created on first use.
    Local { path: PathBuf },
    /// A directory on media that may be unplugged; never created, only
    /// used while it exists.
    Removable { path: PathBuf },
    /// An S3-compatible bucket.
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: Option<String>,
        region: String,
        #[serde(default)]
        endpoint: Option<String>,
        key_id: String,
        key_secret: String,
    },
    /// An external sync program. `{source}` in `args` is replaced with the
    /// absolute path of the authoritative file, `{name}` with its filename.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl TargetConfig {
    pub(crate) fn validate(&self, name: &str) -> Result<()> {
        match self {
            TargetConfig::Local { path } | TargetConfig::Removable { path } => {
                require_absolute(&format!("targets.{name}.path"), path)
            },
            TargetConfig::S3 { bucket, region, key_id, key_secret, .. } => {
                let required = [("bucket", bucket), ("region", region), ("key_id", key_id), ("key_secret", key_secret)];
                for (key, value) in required {
                    if value.trim().is_empty() {
                        exn::bail!(ErrorKind::Invalid(format!("targets.{name}.{key} must not be empty")));
                    }
                }
                Ok(())
            },
            TargetConfig::Command { program, args } => {
                if program.trim().is_empty() {
                    exn::bail!(ErrorKind::Invalid(format!("targets.{name}.program must not be empty")));
                }
                if !args.iter().any(|arg| arg.contains("{source}")) {
                    tracing::warn!(name, "Command target never references {{source}}");
                }
                Ok(())
            },
        }
    }
}

/// Target names end up in logs, the status database and command lines.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        exn::bail!(ErrorKind::Invalid(format!(
            "target name {name:?} must be non-empty and only use letters, digits, '-' and '_'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("local", true)]
    #[case("usb-stick_2", true)]
    #[case("", false)]
    #[case("my cloud", false)]
    #[case("../etc", false)]
    fn test_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_name(name).is_ok(), valid);
    }

    #[test]
    fn test_relative_path_rejected() {
        let target = TargetConfig::Removable { path: PathBuf::from("media/usb") };
        assert!(target.validate("usb").is_err());
        let target = TargetConfig::Removable { path: PathBuf::from("/media/usb") };
        target.validate("usb").unwrap();
    }

    #[test]
    fn test_s3_requires_credentials() {
        let target = TargetConfig::S3 {
            bucket: "bills".to_string(),
            prefix: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            key_id: "key".to_string(),
            key_secret: " ".to_string(),
        };
        assert!(target.validate("cloud").is_err());
    }

    #[test]
    fn test_command_requires_program() {
        let target = TargetConfig::Command { program: String::new(), args: vec![] };
        assert!(target.validate("cloud").is_err());
    }
}
