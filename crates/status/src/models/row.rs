use crate::error::{Error, ErrorKind};
use crate::models::{FileRecord, ReplicaState};
use exn::ResultExt;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Milliseconds since the Unix epoch, the storage format of every timestamp.
pub(crate) fn to_millis(at: OffsetDateTime) -> Result<i64, Error> {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn from_millis(millis: i64) -> Result<OffsetDateTime, Error> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .or_raise(|| ErrorKind::InvalidData("timestamp"))
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub(crate) filename: String,
    pub(crate) uploaded_at: i64,
    pub(crate) size: i64,
    pub(crate) content_hash: String,
}
impl TryFrom<&FileRecord> for FileRow {
    type Error = Error;
    fn try_from(record: &FileRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            filename: record.filename.clone(),
            uploaded_at: to_millis(record.uploaded_at)?,
            size: i64::try_from(record.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            content_hash: record.content_hash.clone(),
        })
    }
}
impl FileRow {
    /// Build the model, attaching whatever replica rows belong to it.
    pub(crate) fn into_record(self, replicas: Vec<ReplicaRow>) -> Result<FileRecord, Error> {
        let replicas = replicas
            .into_iter()
            .map(|row| Ok((row.target.clone(), ReplicaState::try_from(row)?)))
            .collect::<Result<BTreeMap<_, _>, Error>>()?;
        Ok(FileRecord {
            filename: self.filename,
            uploaded_at: from_millis(self.uploaded_at)?,
            size: u64::try_from(self.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            content_hash: self.content_hash,
            replicas,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ReplicaRow {
    pub(crate) filename: String,
    pub(crate) target: String,
    pub(crate) ok: bool,
    pub(crate) attempts: i64,
    pub(crate) last_attempt_at: Option<i64>,
    pub(crate) last_error: Option<String>,
}
impl TryFrom<ReplicaRow> for ReplicaState {
    type Error = Error;
    fn try_from(row: ReplicaRow) -> Result<Self, Self::Error> {
        Ok(Self {
            ok: row.ok,
            attempts: u32::try_from(row.attempts).or_raise(|| ErrorKind::InvalidData("attempt count"))?,
            last_attempt_at: row.last_attempt_at.map(from_millis).transpose()?,
            last_error: row.last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_truncate() {
        let at = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap();
        let millis = to_millis(at).unwrap();
        assert_eq!(millis, 1_700_000_000_123);
        assert_eq!(from_millis(millis).unwrap().nanosecond(), 123_000_000);
    }

    #[test]
    fn test_row_to_model() {
        let row = FileRow {
            filename: "invoice_jan.pdf".to_string(),
            uploaded_at: 1_700_000_000_000,
            size: 1024,
            content_hash: "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262".to_string(),
        };
        let replicas = vec![ReplicaRow {
            filename: "invoice_jan.pdf".to_string(),
            target: "usb".to_string(),
            ok: false,
            attempts: 3,
            last_attempt_at: Some(1_700_000_060_000),
            last_error: Some("unreachable: /media/usb".to_string()),
        }];
        let record = row.into_record(replicas).unwrap();
        assert_eq!(record.size, 1024);
        assert_eq!(record.uploaded_at.unix_timestamp(), 1_700_000_000);
        let usb = record.replica("usb").unwrap();
        assert_eq!(usb.attempts, 3);
        assert!(!usb.ok);
    }

    #[test]
    fn test_negative_size_is_invalid() {
        let row = FileRow {
            filename: "x.pdf".to_string(),
            uploaded_at: 0,
            size: -1,
            content_hash: String::new(),
        };
        let err = row.into_record(Vec::new()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("file size")));
    }
}
