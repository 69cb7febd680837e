//! Upload filename handling.
//!
//! Uploaded names come from the client and end up as keys in every storage
//! tier, so they are reduced to a conservative character set before anything
//! else happens.

use crate::error::{ErrorKind, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static UNSAFE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

/// Longest accepted name, in bytes (common filesystem limit).
const MAX_LEN: usize = 255;

/// Reduce an uploaded name to a safe, flat filename.
///
/// Only the final path component is kept, whitespace runs become `_`, any
/// character outside `[A-Za-z0-9._-]` is dropped and leading dots are
/// stripped, so the result can never be hidden or escape a storage root.
///
/// ```
/// use billsync_replicate::filename::sanitize;
/// assert_eq!(sanitize("Invoice Jan 2024.pdf").unwrap(), "Invoice_Jan_2024.pdf");
/// assert_eq!(sanitize("C:\\Users\\me\\receipt (1).png").unwrap(), "receipt_1.png");
/// assert_eq!(sanitize("../../etc/passwd").unwrap(), "passwd");
/// assert!(sanitize("...").is_err());
/// ```
pub fn sanitize(raw: &str) -> Result<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let spaced = WHITESPACE.replace_all(last, "_");
    let cleaned = UNSAFE.replace_all(&spaced, "");
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() || cleaned.len() > MAX_LEN {
        exn::bail!(ErrorKind::InvalidFilename(raw.to_string()));
    }
    Ok(cleaned.to_string())
}

/// Lowercased text after the last dot, if there is any.
pub fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Case-insensitive set of accepted file extensions.
#[derive(Debug, Clone)]
pub struct AllowedExtensions(BTreeSet<String>);

impl AllowedExtensions {
    pub fn new(extensions: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self(
            extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect(),
        )
    }

    pub fn allows(&self, name: &str) -> bool {
        extension(name).is_some_and(|ext| self.0.contains(&ext))
    }

    /// Fails with [`UnsupportedType`](ErrorKind::UnsupportedType) unless the
    /// name carries an allowed extension.
    pub fn check(&self, name: &str) -> Result<()> {
        if !self.allows(name) {
            exn::bail!(ErrorKind::UnsupportedType(extension(name).unwrap_or_else(|| name.to_string())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("invoice_jan.pdf", "invoice_jan.pdf")]
    #[case("  spaced   out .pdf ", "spaced_out_.pdf")]
    #[case("tab\tand\nnewline.txt", "tab_and_newline.txt")]
    #[case(".hidden.pdf", "hidden.pdf")]
    #[case("/abs/path/scan.PNG", "scan.PNG")]
    #[case("..\\..\\windows\\bill.doc", "bill.doc")]
    #[case("résumé.docx", "rsum.docx")]
    #[case("a;rm -rf *.txt", "arm_-rf_.txt")]
    fn test_sanitize(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("..")]
    #[case("dir/")]
    #[case("€€€")]
    fn test_sanitize_rejects(#[case] raw: &str) {
        let err = sanitize(raw).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidFilename(_)));
    }

    #[test]
    fn test_sanitize_length_limit() {
        assert!(sanitize(&format!("{}.pdf", "a".repeat(251))).is_ok());
        assert!(sanitize(&format!("{}.pdf", "a".repeat(252))).is_err());
    }

    #[rstest]
    #[case("bill.PDF", Some("pdf"))]
    #[case("archive.tar.gz", Some("gz"))]
    #[case("README", None)]
    #[case("trailing.", None)]
    #[case(".pdf", None)]
    fn test_extension(#[case] name: &str, #[case] expected: Option<&str>) {
        assert_eq!(extension(name).as_deref(), expected);
    }

    #[test]
    fn test_allowed_extensions() {
        let allowed = AllowedExtensions::new(["pdf", ".PNG", "jpg"]);
        assert!(allowed.allows("invoice.pdf"));
        assert!(allowed.allows("scan.png"));
        assert!(allowed.allows("photo.JPG"));
        assert!(!allowed.allows("bad.exe"));
        assert!(!allowed.allows("pdf"));
        let err = allowed.check("bad.exe").unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedType(ext) if ext == "exe"));
    }
}
