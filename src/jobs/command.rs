//! Shell command runner for task attempts.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::jobs::error::JobError;

/// How long to keep collecting output after the process group was killed.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Runs `<shell_path> -c <command>` in its own process group.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell_path: String,
}

impl ShellRunner {
    pub fn new(shell_path: impl Into<String>) -> Self {
        Self {
            shell_path: shell_path.into(),
        }
    }

    /// Run `command` to completion or until `cancel` fires.
    ///
    /// Output is stdout followed by stderr. Cancellation kills the whole
    /// process group and reports [`JobError::Cancelled`] alongside whatever
    /// output was produced before the kill.
    pub async fn run(&self, command: &str, cancel: &CancellationToken) -> (Vec<u8>, Option<JobError>) {
        let mut cmd = Command::new(&self.shell_path);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return (Vec::new(), Some(JobError::Spawn(e.to_string()))),
        };

        let stdout = collect(child.stdout.take());
        let stderr = collect(child.stderr.take());
        let pid = child.id();

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let error = match status {
            Some(Ok(status)) if status.success() => None,
            Some(Ok(status)) => Some(JobError::CommandFailed(status.to_string())),
            Some(Err(e)) => Some(JobError::CommandFailed(e.to_string())),
            None => {
                if let Some(pid) = pid {
                    kill_process_group(pid).await;
                }
                if let Err(e) = child.kill().await {
                    tracing::debug!(pid = ?pid, error = %e, "Child already gone");
                }
                Some(JobError::Cancelled)
            }
        };

        let mut output = drain(stdout).await;
        output.extend(drain(stderr).await);
        (output, error)
    }
}

fn collect<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            // A read error keeps what was read so far
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    })
}

/// A pipe stays open while any descendant that escaped the group holds it,
/// so collection is bounded by [`KILL_GRACE`].
async fn drain(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };

    match tokio::time::timeout(KILL_GRACE, &mut reader).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Output reader failed");
            Vec::new()
        }
        Err(_) => {
            reader.abort();
            Vec::new()
        }
    }
}

#[cfg(unix)]
async fn kill_process_group(pid: u32) {
    let result = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{}", pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if let Err(e) = result {
        tracing::warn!(pid, error = %e, "Failed to kill process group");
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: u32) {}
