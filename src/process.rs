#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Timeout-bounded child process execution.

use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::Stdio,
    time::Duration,
};

use anyhow::Context;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
    process::{Child, Command},
    time::timeout,
};

/// Errors raised while spawning or waiting on a child process.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The program could not be started at all.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that was requested.
        program: String,
        /// Underlying OS error.
        #[source]
        source:  std::io::Error,
    },

    /// The process outlived its deadline and was killed.
    #[error("process timed out after {0:?}")]
    TimedOut(Duration),

    /// Pipe or wait failure after the process started.
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Drop guard that terminates a spawned child process if callers forget to
/// await it, or abandon the wait because of a timeout.
///
/// On Unix the child leads its own process group, and the whole group is
/// killed on drop so background jobs it started cannot outlive it.
struct ChildDropGuard {
    /// Child still owed a kill, if any.
    child: Option<Child>,
    /// Process group led by the child.
    group: Option<u32>,
}

impl ChildDropGuard {
    /// Wraps the provided child process with the drop guard.
    fn new(child: Child) -> Self {
        let group = child.id();
        Self {
            child: Some(child),
            group,
        }
    }

    /// Returns a mutable reference to the underlying child process.
    fn child_mut(&mut self) -> anyhow::Result<&mut Child> {
        self.child
            .as_mut()
            .context("child process already taken from guard")
    }

    /// Stops the guard from killing the child itself; stragglers left in its
    /// process group are still killed on drop.
    fn disarm(mut self) {
        self.child = None;
    }
}

impl Drop for ChildDropGuard {
    fn drop(&mut self) {
        if let Some(group) = self.group {
            kill_group(group);
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Sends `SIGKILL` to every process in `group`.
#[cfg(unix)]
fn kill_group(group: u32) {
    let Ok(pgid) = libc::pid_t::try_from(group) else {
        return;
    };
    // SAFETY: kill(2) only takes integers; a negative pid addresses the group.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

/// Process groups are a Unix notion; the child kill covers other platforms.
#[cfg(not(unix))]
fn kill_group(_group: u32) {}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct Collected {
    /// Exit status returned by the process.
    pub status: std::process::ExitStatus,
    /// Contents written to stdout.
    pub stdout: Vec<u8>,
    /// Contents written to stderr.
    pub stderr: Vec<u8>,
}

impl Collected {
    /// Lossy UTF-8 view of stdout.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Lossy UTF-8 view of stderr.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Describes how stdin should be wired for the spawned process.
#[derive(Debug)]
pub enum StdinSource {
    /// Inherit the parent's stdin.
    Inherit,
    /// Attach nothing to stdin.
    Null,
    /// Write the provided bytes, then close stdin.
    Bytes(Vec<u8>),
}

/// Spawns a command, optionally feeds stdin, and collects stdout/stderr.
///
/// When `deadline` elapses the child is killed and
/// [`ProcessError::TimedOut`] is returned.
pub async fn run_collect(
    program: impl AsRef<OsStr>,
    args: &[OsString],
    stdin: StdinSource,
    cwd: Option<&Path>,
    env: &[(OsString, OsString)],
    deadline: Option<Duration>,
) -> Result<Collected, ProcessError> {
    let program_name = program.as_ref().to_string_lossy().into_owned();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    match &stdin {
        StdinSource::Inherit => {
            cmd.stdin(Stdio::inherit());
        }
        StdinSource::Null => {
            cmd.stdin(Stdio::null());
        }
        StdinSource::Bytes(_) => {
            cmd.stdin(Stdio::piped());
        }
    }

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program_name,
        source,
    })?;
    let mut guard = ChildDropGuard::new(child);
    let stdin_payload = match stdin {
        StdinSource::Bytes(bytes) => Some(bytes),
        StdinSource::Inherit | StdinSource::Null => None,
    };

    if let Some(bytes) = stdin_payload
        && let Some(mut handle) = guard.child_mut()?.stdin.take()
    {
        tokio::spawn(async move {
            if !bytes.is_empty() {
                let _ = handle.write_all(&bytes).await;
            }
            let _ = handle.shutdown().await;
        });
    }

    let stdout = guard
        .child_mut()?
        .stdout
        .take()
        .context("missing stdout pipe")?;
    let stderr = guard
        .child_mut()?
        .stderr
        .take()
        .context("missing stderr pipe")?;

    let out_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .context("failed to read stdout")?;
        Ok::<Vec<u8>, anyhow::Error>(buf)
    });

    let err_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .context("failed to read stderr")?;
        Ok::<Vec<u8>, anyhow::Error>(buf)
    });

    let wait_future = async move {
        let mut guard = guard;
        let status = guard
            .child_mut()?
            .wait()
            .await
            .context("failed to wait on process")?;
        let stdout = out_task.await.context("stdout task join error")??;
        let stderr = err_task.await.context("stderr task join error")??;
        guard.disarm();
        Ok::<Collected, anyhow::Error>(Collected {
            status,
            stdout,
            stderr,
        })
    };

    match deadline {
        Some(limit) => match timeout(limit, wait_future).await {
            Ok(collected) => Ok(collected?),
            Err(_) => Err(ProcessError::TimedOut(limit)),
        },
        None => Ok(wait_future.await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = run_collect(
            "definitely-not-a-real-binary-4f1c",
            &[],
            StdinSource::Null,
            None,
            &[],
            Some(Duration::from_secs(1)),
        )
        .await
        .expect_err("spawn should fail");

        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.to_string().contains("definitely-not-a-real-binary-4f1c"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn feeds_stdin_and_captures_stdout() {
        let collected = run_collect(
            "cat",
            &[],
            StdinSource::Bytes(b"ping".to_vec()),
            None,
            &[],
            Some(Duration::from_secs(5)),
        )
        .await
        .expect("cat runs");

        assert!(collected.status.success());
        assert_eq!(collected.stdout_text(), "ping");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kills_process_past_deadline() {
        let started = std::time::Instant::now();
        let err = run_collect(
            "sleep",
            &["30".into()],
            StdinSource::Null,
            None,
            &[],
            Some(Duration::from_millis(200)),
        )
        .await
        .expect_err("sleep should time out");

        assert!(matches!(err, ProcessError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_background_jobs_holding_the_pipes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let started = std::time::Instant::now();
        let err = run_collect(
            "sh",
            &["-c".into(), "sleep 30 & echo $! > bg.pid; exit 0".into()],
            StdinSource::Null,
            Some(dir.path()),
            &[],
            Some(Duration::from_millis(300)),
        )
        .await
        .expect_err("background job keeps stdout open");

        assert!(matches!(err, ProcessError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid = std::fs::read_to_string(dir.path().join("bg.pid")).expect("pid file");
        let stat = format!("/proc/{}/stat", pid.trim());
        let mut alive = true;
        for _ in 0..50 {
            // Reaped, or a zombie waiting for its new parent.
            alive = std::fs::read_to_string(&stat)
                .map(|line| !line.contains(") Z "))
                .unwrap_or(false);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "background sleep survived the timeout");
    }
}
