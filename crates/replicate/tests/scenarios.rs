//! End-to-end pipeline scenarios on real directories: a primary store, a
//! fixed local mirror, a removable drive that starts out unplugged and a
//! cloud target whose sync tool isn't installed.

use billsync_replicate::error::ErrorKind;
use billsync_replicate::target::{BackendTarget, CommandTarget, RemovableTarget};
use billsync_replicate::{
    AllowedExtensions, Gateway, Outcome, Propagator, Scheduler, SyncReport, SyncRun, SyncSettings, TargetHandle,
    Targets, Writer,
};
use billsync_status::{Database, Repository};
use billsync_storage::BackendHandle;
use billsync_storage::backend::LocalBackend;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Pipeline {
    _dir: TempDir,
    usb: PathBuf,
    local: PathBuf,
    status: Repository,
    writer: Writer,
    propagator: Arc<Propagator>,
    gateway: Gateway,
    scheduler: Scheduler,
}

impl Pipeline {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let primary: BackendHandle = Arc::new(LocalBackend::new("primary", dir.path().join("primary")).unwrap());
        let local = dir.path().join("mirror");
        let usb = dir.path().join("usb");
        let targets = Targets::new([
            Arc::new(BackendTarget::local("local", Arc::new(LocalBackend::new("local", &local).unwrap())))
                as TargetHandle,
            Arc::new(RemovableTarget::new("usb", &usb)),
            Arc::new(CommandTarget::new(
                "cloud",
                "billsync-test-sync-tool-not-installed",
                vec!["{source}".to_string()],
                dir.path().join("primary"),
            )),
        ]);

        let db = Database::connect(dir.path().join("status.db")).await.unwrap();
        let status = Repository::from(&db);
        let writer = Writer::new(
            primary.clone(),
            status.clone(),
            AllowedExtensions::new(["pdf", "png", "jpg", "txt"]),
            targets.names(),
        );
        let propagator = Arc::new(Propagator::new(primary.clone(), status.clone(), targets, Duration::from_secs(5)));
        let scheduler = Scheduler::new(propagator.clone(), SyncSettings::default());
        Self {
            _dir: dir,
            usb,
            local,
            status,
            writer,
            propagator,
            gateway: Gateway::new(primary),
            scheduler,
        }
    }

    /// What the upload handler does.
    async fn upload(&self, filename: &str, data: &[u8]) -> String {
        let record = self.writer.commit(filename, data).await.unwrap();
        self.propagator.propagate_eager(&record.filename).await.unwrap();
        record.filename
    }

    async fn flags(&self, filename: &str) -> (bool, bool, bool) {
        let record = self.status.get(filename).await.unwrap().unwrap();
        (record.is_replicated("local"), record.is_replicated("usb"), record.is_replicated("cloud"))
    }

    async fn sync(&self) -> SyncReport {
        match self.scheduler.run_once().await.unwrap() {
            SyncRun::Completed(report) => report,
            SyncRun::Skipped => panic!("nothing else should be running"),
        }
    }
}

#[tokio::test]
async fn committed_bytes_come_back_unchanged() {
    let pipeline = Pipeline::new().await;
    let data: Vec<u8> = (0..=255).cycle().take(100_000).collect();
    let name = pipeline.upload("scan.png", &data).await;
    assert_eq!(pipeline.gateway.fetch(&name).await.unwrap(), data);
    assert_eq!(std::fs::read(pipeline.local.join(&name)).unwrap(), data);
}

#[tokio::test]
async fn removable_media_catches_up_once_plugged_in() {
    let pipeline = Pipeline::new().await;
    let name = pipeline.upload("invoice_jan.pdf", b"%PDF-1.7 january").await;
    assert_eq!(name, "invoice_jan.pdf");
    assert_eq!(pipeline.flags(&name).await, (true, false, false));
    assert!(!pipeline.usb.exists());

    std::fs::create_dir(&pipeline.usb).unwrap();
    let report = pipeline.sync().await;
    assert_eq!(report.replicated, 1);
    // The cloud tool is still missing.
    assert_eq!(report.pending, 1);
    assert_eq!(pipeline.flags(&name).await, (true, true, false));
    assert_eq!(std::fs::read(pipeline.usb.join(&name)).unwrap(), b"%PDF-1.7 january");

    let cloud = pipeline.status.get(&name).await.unwrap().unwrap().replica("cloud").cloned().unwrap();
    assert_eq!(cloud.attempts, 1);
    assert!(cloud.last_error.unwrap().starts_with("unreachable"));
}

#[tokio::test]
async fn unsupported_upload_leaves_no_trace() {
    let pipeline = Pipeline::new().await;
    let err = pipeline.writer.commit("bad.exe", b"MZ\x90\x00").await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::UnsupportedType(ext) if ext == "exe"));
    assert!(pipeline.status.get("bad.exe").await.unwrap().is_none());

    let err = pipeline.gateway.fetch("bad.exe").await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));
}

#[tokio::test]
async fn reupload_starts_replication_over() {
    let pipeline = Pipeline::new().await;
    std::fs::create_dir(&pipeline.usb).unwrap();
    let name = pipeline.upload("invoice_jan.pdf", b"first draft").await;
    assert_eq!(pipeline.flags(&name).await, (true, true, false));

    let record = pipeline.writer.commit("invoice_jan.pdf", b"final version").await.unwrap();
    assert_eq!(pipeline.flags(&name).await, (false, false, false));
    assert_eq!(pipeline.gateway.fetch(&name).await.unwrap(), b"final version");
    assert_eq!(record.size, 13);

    pipeline.propagator.propagate_eager(&name).await.unwrap();
    assert_eq!(pipeline.flags(&name).await, (true, true, false));
    assert_eq!(std::fs::read(pipeline.usb.join(&name)).unwrap(), b"final version");
}

#[tokio::test]
async fn one_scheduler_run_converges_a_returning_target() {
    let pipeline = Pipeline::new().await;
    let names: Vec<String> = futures::future::join_all(
        (0..8).map(|i| {
            let pipeline = &pipeline;
            async move { pipeline.upload(&format!("receipt_{i:02}.jpg"), format!("receipt {i}").as_bytes()).await }
        }),
    )
    .await;
    assert_eq!(pipeline.status.list_pending("usb").await.unwrap().len(), 8);

    std::fs::create_dir(&pipeline.usb).unwrap();
    pipeline.sync().await;
    assert!(pipeline.status.list_pending("usb").await.unwrap().is_empty());
    for name in &names {
        assert_eq!(pipeline.flags(name).await, (true, true, false));
    }
    assert_eq!(pipeline.status.list_pending("cloud").await.unwrap().len(), 8);
}

#[tokio::test]
async fn propagating_twice_changes_nothing() {
    let pipeline = Pipeline::new().await;
    std::fs::create_dir(&pipeline.usb).unwrap();
    let name = pipeline.upload("invoice_jan.pdf", b"%PDF-1.7").await;
    let before = pipeline.status.get(&name).await.unwrap().unwrap();

    let reports = pipeline.propagator.propagate_eager(&name).await.unwrap();
    assert!(reports.iter().all(|r| r.outcome == Outcome::AlreadyReplicated));
    assert_eq!(pipeline.status.get(&name).await.unwrap().unwrap(), before);
}

#[tokio::test]
async fn unplugging_mid_life_never_unsets_a_flag() {
    let pipeline = Pipeline::new().await;
    std::fs::create_dir(&pipeline.usb).unwrap();
    let name = pipeline.upload("invoice_jan.pdf", b"%PDF-1.7").await;
    std::fs::remove_dir_all(&pipeline.usb).unwrap();

    pipeline.sync().await;
    let reports = pipeline.propagator.propagate(&name, &["usb".to_string()]).await.unwrap();
    assert_eq!(reports[0].outcome, Outcome::AlreadyReplicated);
    assert_eq!(pipeline.flags(&name).await, (true, true, false));
}
