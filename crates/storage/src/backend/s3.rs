//! Object storage replicas: AWS S3 or anything speaking its API (MinIO,
//! Backblaze B2 and so on).
//!
//! Credentials come from the target's own entry in the configuration file,
//! never from the environment.

use crate::{
    FileInfo, StorageBackend,
    backend::{BoxSyncRead, FileInfoStream},
    error::{ErrorKind, Result},
    validate_path,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTime},
};
use exn::{OptionExt, ResultExt};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Requests in flight at once, per backend.
const MAX_IN_FLIGHT: usize = 32;

/// A bucket, or a key prefix inside one, used as a replica.
///
/// Paths map to keys below the prefix; listing only sees keys under it.
///
/// ```no_run
/// use billsync_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "cloud",
///     "my-bucket",
///     Some("bills/".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// No request is made here; an unreachable endpoint or bad credentials
    /// only surface on the first operation. `endpoint` is needed for anything
    /// that isn't AWS itself.
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let name = name.into();
        let bucket = bucket.into();
        let region = Region::new(region.into());
        let credentials = Credentials::new(key_id, key_secret, None, None, "billsync-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Virtual-host addressing isn't supported by most self-hosted stores.
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let client = Client::from_conf(config_builder.build());
        let rate_limiter = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        Ok(Self {
            name,
            client,
            bucket,
            prefix,
            rate_limiter,
        })
    }

    fn full_key(&self, path: &Path) -> Result<String> {
        let validated = validate_path(path)?;
        let path_str = validated.to_str().ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), path_str),
            None => path_str.to_string(),
        })
    }

    /// Key prefix used when listing, always ending in a separator when set.
    fn list_prefix(&self) -> Option<String> {
        self.prefix.as_ref().map(|prefix| format!("{}/", prefix.trim_end_matches('/')))
    }

    /// Inverse of `full_key`.
    fn relative_path(&self, key: &str) -> Result<PathBuf> {
        let relative = match &self.prefix {
            Some(prefix) => {
                let prefix_normalized = prefix.trim_end_matches('/');
                key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
            },
            None => key,
        };
        validate_path(relative)
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, path: &Path) -> ErrorKind
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        match &err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                ErrorKind::Network(DisplayErrorContext(&err).to_string())
            },
            SdkError::ServiceError(service) => {
                let status = service.raw().status().as_u16();
                match (status, service.err().code()) {
                    (404, _) | (_, Some("NoSuchKey" | "NotFound")) => ErrorKind::NotFound(path.to_path_buf()),
                    (401 | 403, _) | (_, Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch")) => {
                        ErrorKind::PermissionDenied(path.to_path_buf())
                    },
                    _ => ErrorKind::BackendError(DisplayErrorContext(&err).to_string()),
                }
            },
            _ => ErrorKind::BackendError(DisplayErrorContext(&err).to_string()),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream(&self) -> FileInfoStream<'_> {
        let key_prefix = self.list_prefix();
        Box::pin(stream!({
            let _permit = match self.acquire_permit().await {
                Ok(permit) => permit,
                Err(e) => { yield Err(e); return; },
            };
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(key_prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        // A failed page can't be resumed; stop here.
                        yield Err(exn::Exn::from(Self::map_sdk_error(e, Path::new(&self.bucket))));
                        return;
                    },
                };
                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    let path = match self.relative_path(key) {
                        Ok(path) => path,
                        Err(e) => { yield Err(e); continue; },
                    };
                    let size = u64::try_from(object.size().unwrap_or(0)).unwrap_or(0);
                    let modified = match object.last_modified().map(Self::parse_datetime).transpose() {
                        Ok(modified) => modified.unwrap_or(OffsetDateTime::UNIX_EPOCH),
                        Err(e) => { yield Err(e); continue; },
                    };
                    yield Ok(FileInfo::new(path, size, modified));
                }
            }
        }))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        let body = output
            .body
            .collect()
            .await
            .or_raise(|| ErrorKind::Network(format!("reading body of {}", path.display())))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        // Objects are small documents; buffering keeps the reader free of the runtime.
        Ok(Box::new(Cursor::new(self.read(path).await?)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        tracing::trace!(backend = %self.name, path = %path.display(), bytes = data.len(), "Uploaded object");
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        // S3 happily "deletes" keys that don't exist.
        if !self.exists(path).await? {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let key = self.full_key(path)?;
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;
        let size = u64::try_from(output.content_length().unwrap_or(0))
            .or_raise(|| ErrorKind::BackendError("negative S3 content length".to_string()))?;
        let modified =
            output.last_modified().map(Self::parse_datetime).transpose()?.unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Ok(FileInfo::new(validate_path(path)?, size, modified))
    }
}
