//! Wiring configuration into a running pipeline.

use crate::error::{ErrorKind, Result};
use billsync_config::{Config, TargetConfig};
use billsync_replicate::target::{BackendTarget, CommandTarget, RemovableTarget};
use billsync_replicate::{
    AllowedExtensions, Gateway, Propagator, Scheduler, SyncSettings, TargetHandle, Targets, Writer,
};
use billsync_status::{Database, Repository};
use billsync_storage::BackendHandle;
use billsync_storage::backend::LocalBackend;
use exn::ResultExt;
use std::path::Path;
use std::sync::Arc;

/// Every component of the pipeline, built once from the configuration.
pub struct App {
    pub config: Config,
    db: Database,
    pub primary: BackendHandle,
    pub status: Repository,
    pub writer: Writer,
    pub propagator: Arc<Propagator>,
    pub gateway: Gateway,
    pub scheduler: Scheduler,
}

impl App {
    pub async fn open(config: Config) -> Result<Self> {
        if let Some(parent) = config.storage.database.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io(parent.to_path_buf()))?;
        }
        let db = Database::connect(&config.storage.database).await.or_raise(|| ErrorKind::Database)?;
        let status = Repository::from(&db);
        let primary: BackendHandle = Arc::new(
            LocalBackend::new("primary", &config.storage.primary).or_raise(|| ErrorKind::Storage("primary".into()))?,
        );

        let mut targets = Vec::with_capacity(config.targets.len());
        for (name, target) in &config.targets {
            targets.push(build_target(name, target, &config.storage.primary).await?);
        }
        let targets = Targets::new(targets);
        tracing::debug!(?targets, "Configured replication targets");

        let writer = Writer::new(
            primary.clone(),
            status.clone(),
            AllowedExtensions::new(config.upload.normalized_extensions()),
            targets.names(),
        );
        let propagator = Arc::new(Propagator::new(
            primary.clone(),
            status.clone(),
            targets,
            config.sync.attempt_timeout(),
        ));
        let settings = SyncSettings {
            interval: config.sync.interval(),
            file_budget: config.sync.file_budget(),
            concurrency: config.sync.concurrency,
        };
        Ok(Self {
            scheduler: Scheduler::new(propagator.clone(), settings),
            gateway: Gateway::new(primary.clone()),
            writer,
            propagator,
            primary,
            status,
            db,
            config,
        })
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

async fn build_target(name: &str, target: &TargetConfig, primary_root: &Path) -> Result<TargetHandle> {
    let handle: TargetHandle = match target {
        TargetConfig::Local { path } => {
            let backend = LocalBackend::new(name, path).or_raise(|| ErrorKind::Storage(name.to_string()))?;
            Arc::new(BackendTarget::local(name, Arc::new(backend)))
        },
        TargetConfig::Removable { path } => Arc::new(RemovableTarget::new(name, path)),
        TargetConfig::Command { program, args } => {
            Arc::new(CommandTarget::new(name, program.clone(), args.clone(), primary_root))
        },
        #[cfg(feature = "s3")]
        TargetConfig::S3 { bucket, prefix, region, endpoint, key_id, key_secret } => {
            let backend = billsync_storage::backend::S3Backend::new(
                name,
                bucket.clone(),
                prefix.clone(),
                region.clone(),
                endpoint.clone(),
                key_id.clone(),
                key_secret.clone(),
            )
            .await
            .or_raise(|| ErrorKind::Storage(name.to_string()))?;
            Arc::new(BackendTarget::remote(name, Arc::new(backend)))
        },
        #[cfg(not(feature = "s3"))]
        TargetConfig::S3 { .. } => exn::bail!(ErrorKind::Unsupported(name.to_string(), "s3")),
    };
    Ok(handle)
}
