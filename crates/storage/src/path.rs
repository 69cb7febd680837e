//! Keys handed to a backend are relative to that backend's root. Everything
//! here exists so a key can never point outside it, whatever the uploader put
//! in the filename.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Resolve `path` to a normalized relative key, or fail with
/// [`InvalidPath`](ErrorKind::InvalidPath) if it would climb out of the root,
/// carries a drive prefix, contains a NUL byte or names nothing at all.
///
/// `.` components and repeated separators disappear, `..` is resolved
/// lexically and a leading `/` is treated as the root itself.
///
/// ```
/// use std::path::Path;
/// use billsync_storage::validate_path;
///
/// assert!(validate_path("2024/q1/invoice_jan.pdf").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("2024/../../up.pdf").is_err());
/// assert_eq!(validate_path("/2024/./drafts/../receipt.png").unwrap(), Path::new("2024/receipt.png"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut resolved: Vec<&std::ffi::OsStr> = Vec::new();
    for component in original.components() {
        match component {
            Component::CurDir | Component::RootDir => continue,
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if resolved.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
            // Would be silently truncated by the OS.
            Component::Normal(part) if part.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
            Component::Normal(part) => resolved.push(part),
        }
    }
    if resolved.is_empty() {
        exn::bail!(invalid());
    }
    Ok(resolved.into_iter().collect())
}

/// Validates a flat file name: exactly one normal path component.
///
/// Uploaded files are keyed by name alone, so unlike [`validate`] this
/// refuses anything that would place the blob in a subdirectory.
///
/// ```
/// use billsync_storage::validate_file_name;
/// assert!(validate_file_name("invoice_jan.pdf").is_ok());
/// assert!(validate_file_name("2024/invoice_jan.pdf").is_err());
/// assert!(validate_file_name("..").is_err());
/// ```
pub fn validate_file_name(name: impl AsRef<Path>) -> Result<PathBuf> {
    let validated = validate(name.as_ref())?;
    if validated.components().count() != 1 || validated != name.as_ref() {
        exn::bail!(ErrorKind::InvalidPath(name.as_ref().to_path_buf()));
    }
    Ok(validated)
}
