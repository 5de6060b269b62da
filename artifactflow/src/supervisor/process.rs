//! Supervised execution of stage workers.

use super::command::Invocation;
use super::output::BoundedOutput;
use crate::cancellation::CancellationToken;
use crate::core::{ProcessExit, ProcessOutcome};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default bound on captured output (64 KiB).
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Default time allowed for output readers to drain after the worker ends.
pub const DEFAULT_READER_GRACE: Duration = Duration::from_secs(2);

/// Runs one stage worker to completion.
///
/// Implementations never inspect artifacts and never return an error: every
/// way a worker can end, including failing to start, is a [`ProcessExit`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Runs the invocation, honoring its timeout and the cancellation token.
    async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> ProcessOutcome;
}

/// Supervises workers as child processes.
///
/// Each worker is started in a fresh process group with stdin closed. When
/// the timeout elapses or the job is cancelled the whole group is killed, so
/// helpers the worker spawned cannot outlive it. On Linux, group members
/// still alive after the leader exits are killed as well, before the leader
/// is reaped.
#[derive(Debug, Clone)]
pub struct SubprocessSupervisor {
    output_limit: usize,
    reader_grace: Duration,
}

impl Default for SubprocessSupervisor {
    fn default() -> Self {
        Self {
            output_limit: DEFAULT_OUTPUT_LIMIT,
            reader_grace: DEFAULT_READER_GRACE,
        }
    }
}

enum Ending {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl SubprocessSupervisor {
    /// Creates a supervisor with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the captured output bound in bytes.
    #[must_use]
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Sets how long output readers may drain after the worker ends.
    #[must_use]
    pub fn with_reader_grace(mut self, grace: Duration) -> Self {
        self.reader_grace = grace;
        self
    }

    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    async fn drain(&self, mut readers: Vec<JoinHandle<()>>, invocation: &Invocation) {
        let joined = futures::future::join_all(readers.iter_mut());
        if tokio::time::timeout(self.reader_grace, joined).await.is_err() {
            warn!(
                job_id = %invocation.job_id,
                stage = %invocation.stage,
                "Output still open after worker ended; abandoning readers"
            );
            for reader in &readers {
                reader.abort();
            }
        }
    }
}

fn pump<R>(mut reader: R, sink: Arc<Mutex<BoundedOutput>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8 * 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().push(&buf[..n]),
            }
        }
    })
}

fn exit_from_status(status: ExitStatus) -> ProcessExit {
    if let Some(code) = status.code() {
        return ProcessExit::Exited { code };
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ProcessExit::Signaled { signal };
        }
    }
    ProcessExit::Exited { code: -1 }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!(pgid, error = %e, "Failed to kill process group");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) -> bool {
    false
}

/// Waits until the leader has exited without reaping it.
///
/// Returns true once the leader is a zombie: its pid, and so its process
/// group id, stays allocated until [`Child::wait`] reaps it.
#[cfg(target_os = "linux")]
async fn leader_exited(pid: Option<u32>) -> bool {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return false;
    };
    tokio::task::spawn_blocking(move || loop {
        match waitid(
            Id::Pid(Pid::from_raw(pid)),
            WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT,
        ) {
            Err(Errno::EINTR) => {}
            other => return other.is_ok(),
        }
    })
    .await
    .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
async fn leader_exited(_pid: Option<u32>) -> bool {
    false
}

async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Worker already gone");
    }
}

#[async_trait]
impl ProcessSupervisor for SubprocessSupervisor {
    async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> ProcessOutcome {
        let started_at = Utc::now();
        let output = Arc::new(Mutex::new(BoundedOutput::new(self.output_limit)));

        let mut child = match Self::command(invocation).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    job_id = %invocation.job_id,
                    stage = %invocation.stage,
                    program = %invocation.program,
                    error = %e,
                    "Failed to spawn worker"
                );
                return ProcessOutcome {
                    stage: invocation.stage.clone(),
                    started_at,
                    ended_at: Utc::now(),
                    exit: ProcessExit::SpawnFailed {
                        message: format!("{}: {e}", invocation.program),
                    },
                    output: output.lock().snapshot(),
                };
            }
        };

        let pid = child.id();
        info!(
            job_id = %invocation.job_id,
            stage = %invocation.stage,
            pid = pid.unwrap_or_default(),
            command = %invocation.command_line(),
            timeout_ms = u64::try_from(invocation.timeout.as_millis()).unwrap_or(u64::MAX),
            "Spawned worker"
        );

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(pump(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(pump(stderr, output.clone()));
        }

        let exited = async {
            // Strays are only swept while the leader is unreaped.
            if leader_exited(pid).await && kill_group(pid) {
                debug!(stage = %invocation.stage, "Swept the worker's process group");
            }
            child.wait().await
        };

        let ending = tokio::select! {
            status = exited => Ending::Exited(status),
            () = tokio::time::sleep(invocation.timeout) => Ending::TimedOut,
            () = cancel.cancelled() => Ending::Cancelled,
        };

        let exit = match ending {
            Ending::Exited(Ok(status)) => exit_from_status(status),
            Ending::Exited(Err(e)) => {
                terminate(&mut child, pid).await;
                ProcessExit::SpawnFailed {
                    message: format!("waiting on worker failed: {e}"),
                }
            }
            Ending::TimedOut => {
                terminate(&mut child, pid).await;
                let timeout_ms = u64::try_from(invocation.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    job_id = %invocation.job_id,
                    stage = %invocation.stage,
                    timeout_ms,
                    "Worker timed out; killed its process group"
                );
                ProcessExit::TimedOut { timeout_ms }
            }
            Ending::Cancelled => {
                terminate(&mut child, pid).await;
                let reason = cancel.reason().unwrap_or_else(|| "cancelled".to_string());
                warn!(
                    job_id = %invocation.job_id,
                    stage = %invocation.stage,
                    reason = %reason,
                    "Job cancelled; killed worker process group"
                );
                ProcessExit::Cancelled { reason }
            }
        };

        self.drain(readers, invocation).await;
        let captured = output.lock().snapshot();
        let ended_at = Utc::now();

        debug!(
            job_id = %invocation.job_id,
            stage = %invocation.stage,
            exit = %exit,
            output_bytes = captured.text.len(),
            truncated_bytes = captured.truncated_bytes,
            "Worker finished"
        );

        ProcessOutcome {
            stage: invocation.stage.clone(),
            started_at,
            ended_at,
            exit,
            output: captured,
        }
    }
}

#[cfg(all(test, unix))]
#[path = "process_tests.rs"]
mod tests;
