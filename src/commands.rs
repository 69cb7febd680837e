//! Subcommand implementations; output goes to stdout, logs to stderr.

use crate::app::App;
use crate::error::{ErrorKind, Result};
use billsync_replicate::{ReconcileReport, SyncRun, TargetReport};
use billsync_status::FileRecord;
use exn::ResultExt;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;

pub async fn upload(app: &App, file: &Path, name: Option<&str>) -> Result<()> {
    let data = tokio::fs::read(file).await.or_raise(|| ErrorKind::Io(file.to_path_buf()))?;
    let name = match name {
        Some(name) => name.to_string(),
        None => file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
    };
    let record = app.writer.commit(&name, &data).await.or_raise(|| ErrorKind::Command("upload"))?;
    println!("committed {} ({} bytes)", record.filename, record.size);
    if let Some(reports) = replicate_eagerly(app, &record.filename).await {
        print_reports(&reports);
    }
    Ok(())
}

/// Best-effort copy to the eager targets after a commit. The upload already
/// succeeded, so a failure here is only logged and left to the scheduler.
async fn replicate_eagerly(app: &App, filename: &str) -> Option<Vec<TargetReport>> {
    match app.propagator.propagate_eager(filename).await {
        Ok(reports) => Some(reports),
        Err(e) => {
            tracing::warn!(filename, error = ?e, "Eager replication failed; the scheduler will retry");
            None
        },
    }
}

pub async fn fetch(app: &App, name: &str, output: Option<&Path>) -> Result<()> {
    let data = app.gateway.fetch(name).await.or_raise(|| ErrorKind::Command("fetch"))?;
    match output {
        Some(path) => tokio::fs::write(path, &data).await.or_raise(|| ErrorKind::Io(path.to_path_buf()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await.or_raise(|| ErrorKind::Command("fetch"))?;
            stdout.flush().await.or_raise(|| ErrorKind::Command("fetch"))?;
        },
    }
    Ok(())
}

pub async fn list(app: &App) -> Result<()> {
    let targets = app.config.target_names();
    for record in app.status.list_all().await.or_raise(|| ErrorKind::Command("list"))? {
        println!("{}", describe(&record, &targets));
        for target in &targets {
            if let Some(error) = record.replica(target).and_then(|r| r.last_error.as_deref()) {
                println!("    {target}: {error}");
            }
        }
    }
    Ok(())
}

pub async fn status(app: &App) -> Result<()> {
    let summary = app.status.summary(&app.config.target_names()).await.or_raise(|| ErrorKind::Command("status"))?;
    for target in summary {
        println!(
            "{:<16} {:>6} replicated {:>6} pending {:>6} failing",
            target.target, target.replicated, target.pending, target.failing
        );
    }
    Ok(())
}

pub async fn sync(app: &App) -> Result<()> {
    match app.scheduler.run_once().await.or_raise(|| ErrorKind::Command("sync"))? {
        SyncRun::Completed(report) => println!(
            "{} files: {} copies made, {} still pending, {} errors, {} skipped",
            report.files, report.replicated, report.pending, report.errors, report.skipped
        ),
        SyncRun::Skipped => println!("another sync is already running"),
    }
    Ok(())
}

pub async fn reconcile(app: &App) -> Result<()> {
    let report = repair(app).await?;
    if report.is_clean() {
        println!("nothing to repair");
    }
    for filename in &report.adopted {
        println!("adopted   {filename}");
    }
    for filename in &report.refreshed {
        println!("refreshed {filename}");
    }
    for filename in &report.forgotten {
        println!("forgot    {filename}");
    }
    Ok(())
}

pub async fn run(app: &App) -> Result<()> {
    let report = repair(app).await?;
    if !report.is_clean() {
        tracing::warn!(
            adopted = report.adopted.len(),
            refreshed = report.refreshed.len(),
            forgotten = report.forgotten.len(),
            "Repaired status database"
        );
    }
    let handle = app.scheduler.start();
    tracing::info!(interval = ?app.scheduler.settings().interval, "Sync scheduler started; press Ctrl-C to stop");
    let signal = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down");
    handle.stop().await;
    signal.or_raise(|| ErrorKind::Command("run"))
}

async fn repair(app: &App) -> Result<ReconcileReport> {
    billsync_replicate::reconcile(&app.primary, &app.status, &app.config.target_names())
        .await
        .or_raise(|| ErrorKind::Command("reconcile"))
}

fn print_reports(reports: &[TargetReport]) {
    for report in reports {
        println!("  {:<16} {}", report.target, report.outcome);
    }
}

fn describe(record: &FileRecord, targets: &[String]) -> String {
    let uploaded = record.uploaded_at.format(&Rfc3339).unwrap_or_else(|_| record.uploaded_at.to_string());
    let flags: Vec<String> = targets
        .iter()
        .map(|target| {
            let mark = if record.is_replicated(target) { "+" } else { "-" };
            format!("{mark}{target}")
        })
        .collect();
    format!("{:<40} {:>10} {uploaded} {}", record.filename, record.size, flags.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use billsync_config::{Config, TargetConfig};
    use billsync_status::ReplicaState;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    async fn app(dir: &Path) -> App {
        let mut config = Config::default();
        config.storage.primary = dir.join("files");
        config.storage.database = dir.join("status.db");
        config.targets = BTreeMap::from([("local".to_string(), TargetConfig::Local { path: dir.join("mirror") })]);
        App::open(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_upload() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;
        let source = dir.path().join("Invoice Jan.pdf");
        std::fs::write(&source, b"%PDF-1.7").unwrap();

        upload(&app, &source, None).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("mirror/Invoice_Jan.pdf")).unwrap(), b"%PDF-1.7");
        assert!(app.status.get("Invoice_Jan.pdf").await.unwrap().unwrap().is_replicated("local"));
        app.close().await;
    }

    #[tokio::test]
    async fn test_failed_eager_replication_keeps_commit() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path()).await;
        let record = app.writer.commit("bill.pdf", b"%PDF-1.7").await.unwrap();
        // Unreadable authoritative copy: a directory where the blob should be.
        let blob = dir.path().join("files/bill.pdf");
        std::fs::remove_file(&blob).unwrap();
        std::fs::create_dir(&blob).unwrap();

        assert!(replicate_eagerly(&app, &record.filename).await.is_none());
        let stored = app.status.get("bill.pdf").await.unwrap().unwrap();
        assert!(!stored.is_replicated("local"));
        app.close().await;
    }

    #[test]
    fn test_describe() {
        let mut record =
            FileRecord::new("invoice_jan.pdf", 8, "hash").with_uploaded_at(datetime!(2024-01-31 12:00 UTC));
        record.replicas.insert("local".to_string(), ReplicaState { ok: true, ..Default::default() });
        let line = describe(&record, &["local".to_string(), "usb".to_string()]);
        assert!(line.starts_with("invoice_jan.pdf "));
        assert!(line.contains("2024-01-31T12:00:00Z"));
        assert!(line.ends_with("+local -usb"));
    }
}
