use super::{Reachability, ReplicationTarget, Tier};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use billsync_storage::validate_file_name;
use exn::ResultExt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Longest stderr excerpt kept in an error message.
const STDERR_EXCERPT: usize = 512;

/// A remote target reached through an external sync program such as
/// `rclone`.
///
/// Arguments may contain `{source}` (absolute path of the authoritative copy)
/// and `{name}` (the filename). The program reads the file itself, so the
/// authoritative store must be a local directory.
///
/// The child is killed when the copy future is dropped, which is how a
/// caller's timeout takes effect.
pub struct CommandTarget {
    name: String,
    program: String,
    args: Vec<String>,
    source_root: PathBuf,
}

impl CommandTarget {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        source_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            source_root: source_root.into(),
        }
    }

    /// Full path of the program, looked up on `PATH` off the runtime threads.
    async fn resolve(&self) -> std::result::Result<PathBuf, String> {
        let program = self.program.clone();
        match tokio::task::spawn_blocking(move || which::which(program)).await {
            Ok(Ok(path)) => Ok(path),
            Ok(Err(e)) => Err(format!("{} is not installed: {e}", self.program)),
            Err(e) => Err(format!("could not look up {}: {e}", self.program)),
        }
    }

    fn render_args(&self, filename: &str) -> Vec<String> {
        let source = self.source_root.join(filename);
        let source = source.to_string_lossy();
        self.args.iter().map(|arg| arg.replace("{source}", &source).replace("{name}", filename)).collect()
    }
}

#[async_trait]
impl ReplicationTarget for CommandTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> Tier {
        Tier::Remote
    }

    async fn reachable(&self) -> Reachability {
        match self.resolve().await {
            Ok(_) => Reachability::Reachable,
            Err(why) => Reachability::Unreachable(why),
        }
    }

    async fn copy(&self, filename: &str, data: &[u8]) -> Result<()> {
        validate_file_name(filename).or_raise(|| ErrorKind::InvalidFilename(filename.to_string()))?;
        let program = match self.resolve().await {
            Ok(program) => program,
            Err(why) => exn::bail!(ErrorKind::TargetUnreachable(self.name.clone(), why)),
        };
        let args = self.render_args(filename);
        tracing::debug!(target_name = %self.name, program = %program.display(), ?args, "Running sync command");

        let output = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .or_raise(|| ErrorKind::CopyFailed(self.name.clone(), format!("could not run {}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            // Keep the end of the output; that's where tools put the reason.
            let excerpt = match stderr.char_indices().rev().nth(STDERR_EXCERPT) {
                Some((at, _)) => &stderr[at..],
                None => stderr,
            };
            let why = format!("{} exited with {}: {excerpt}", self.program, output.status);
            exn::bail!(ErrorKind::CopyFailed(self.name.clone(), why));
        }
        tracing::trace!(target_name = %self.name, filename, bytes = data.len(), "Sync command finished");
        Ok(())
    }
}
