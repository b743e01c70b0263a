//! Launching and supervising one external process per attempt.

use crate::errors::SpawnError;
use crate::model::{CapturedOutput, ErrorCategory, Invocation, ProcessOutput};
use crate::timeout::{Deadline, TerminationMode};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

#[async_trait]
pub trait Spawner: Send + Sync {
    /// Runs `invocation` to completion or until `deadline` fires.
    async fn run(
        &self,
        invocation: &Invocation,
        deadline: Deadline,
    ) -> Result<ProcessOutput, SpawnError>;
}

#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    max_output_bytes: usize,
}

impl Default for ProcessSpawner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl ProcessSpawner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn run(
        &self,
        invocation: &Invocation,
        deadline: Deadline,
    ) -> Result<ProcessOutput, SpawnError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let child = command
            .spawn()
            .map_err(|e| SpawnError::from_io(&invocation.program, &e))?;
        let pgid = child.id();
        let mut process = ProcessGuard {
            child,
            pgid,
            settled: false,
        };
        debug!(
            program = %invocation.program,
            pid = process.child.id(),
            limit_ms = deadline.limit.as_millis() as u64,
            "spawned process"
        );

        let mut stdout = process.child.stdout.take();
        let mut stderr = process.child.stderr.take();
        let mut stdout_buf = BoundedBuffer::new(self.max_output_bytes);
        let mut stderr_buf = BoundedBuffer::new(self.max_output_bytes);

        let supervised = supervise(
            &mut process,
            deadline.limit,
            stdout.as_mut(),
            stderr.as_mut(),
            &mut stdout_buf,
            &mut stderr_buf,
        )
        .await;

        match supervised {
            Some(Ok(status)) => Ok(ProcessOutput {
                exit_code: status.code(),
                timed_out: false,
                duration: started.elapsed(),
                output: captured(stdout_buf, stderr_buf),
            }),
            Some(Err(error)) => {
                process.kill().await;
                Err(SpawnError::new(
                    ErrorCategory::ResourceExhaustion,
                    format!("failed to wait on '{}': {error}", invocation.program),
                ))
            }
            None => {
                warn!(
                    program = %invocation.program,
                    mode = ?deadline.mode,
                    limit_ms = deadline.limit.as_millis() as u64,
                    "deadline exceeded, terminating process"
                );
                let output = match deadline.mode {
                    TerminationMode::Hard => {
                        process.kill().await;
                        CapturedOutput::default()
                    }
                    TerminationMode::Graceful => {
                        process.signal_terminate();
                        let exited = supervise(
                            &mut process,
                            deadline.grace,
                            stdout.as_mut(),
                            stderr.as_mut(),
                            &mut stdout_buf,
                            &mut stderr_buf,
                        )
                        .await
                        .is_some_and(|status| status.is_ok());
                        if !exited {
                            warn!(program = %invocation.program, "grace period expired, killing process");
                            process.kill().await;
                        }
                        captured(stdout_buf, stderr_buf)
                    }
                };

                Ok(ProcessOutput {
                    exit_code: None,
                    timed_out: true,
                    duration: started.elapsed(),
                    output,
                })
            }
        }
    }
}

/// Owns the child so that every exit path, including a dropped future, takes the whole
/// process group down with it.
struct ProcessGuard {
    child: Child,
    /// Group leader pid captured at spawn; stays valid for stragglers after the leader is reaped.
    pgid: Option<u32>,
    /// Set once the group has been killed, or the leader exited and every pipe closed. The id
    /// may be reused after that, so the group is never signalled again.
    settled: bool,
}

impl ProcessGuard {
    async fn kill(&mut self) {
        self.signal_group_kill();
        if let Err(error) = self.child.start_kill() {
            debug!(%error, "start_kill after group kill");
        }
        if let Err(error) = self.child.wait().await {
            warn!(%error, "failed to reap killed process");
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) {
        self.signal_group(nix::sys::signal::Signal::SIGTERM);
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) {
        let _ = self.child.start_kill();
    }

    fn signal_group_kill(&mut self) {
        if self.settled {
            return;
        }
        #[cfg(unix)]
        self.signal_group(nix::sys::signal::Signal::SIGKILL);
        self.settled = true;
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        if self.settled {
            return;
        }
        let Some(pgid) = self.pgid else {
            return;
        };
        if let Err(errno) = killpg(Pid::from_raw(pgid as i32), signal) {
            debug!(pgid, ?signal, %errno, "failed to signal process group");
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.signal_group_kill();
    }
}

/// How long output pipes may stay open after the leader exits before the group is killed.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Waits up to `limit` for the leader to exit while collecting output. Returns `None` when
/// `limit` elapses first. Once the leader exits, background children still holding a pipe get
/// `EXIT_DRAIN_GRACE` before the whole group is killed and the rest of the output is drained.
async fn supervise(
    process: &mut ProcessGuard,
    limit: Duration,
    stdout: Option<&mut ChildStdout>,
    stderr: Option<&mut ChildStderr>,
    stdout_buf: &mut BoundedBuffer,
    stderr_buf: &mut BoundedBuffer,
) -> Option<std::io::Result<ExitStatus>> {
    let drains = async {
        tokio::join!(drain(stdout, stdout_buf), drain(stderr, stderr_buf));
    };
    tokio::pin!(drains);
    let mut drained = false;

    let child = &mut process.child;
    let waited = tokio::time::timeout(limit, async {
        loop {
            tokio::select! {
                status = child.wait() => break status,
                () = &mut drains, if !drained => drained = true,
            }
        }
    })
    .await;
    let status = waited.ok()?;
    if status.is_err() {
        return Some(status);
    }

    if !drained && tokio::time::timeout(EXIT_DRAIN_GRACE, &mut drains).await.is_ok() {
        drained = true;
    }
    if !drained {
        debug!(pgid = process.pgid, "output still open after exit, killing process group");
        process.signal_group_kill();
        if tokio::time::timeout(EXIT_DRAIN_GRACE, &mut drains).await.is_err() {
            debug!(pgid = process.pgid, "abandoning output held outside the process group");
        }
    }
    process.settled = true;
    Some(status)
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<&mut R>, buffer: &mut BoundedBuffer) {
    let Some(reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8 * 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => buffer.push(&chunk[..read]),
        }
    }
}

/// Keeps the first `limit` bytes of a stream and silently discards the rest.
#[derive(Debug)]
struct BoundedBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl BoundedBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, data: &[u8]) {
        let room = self.limit.saturating_sub(self.bytes.len());
        if data.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&data[..data.len().min(room)]);
    }

    fn into_parts(self) -> (String, bool) {
        (
            String::from_utf8_lossy(&self.bytes).into_owned(),
            self.truncated,
        )
    }
}

fn captured(stdout: BoundedBuffer, stderr: BoundedBuffer) -> CapturedOutput {
    let (stdout, stdout_truncated) = stdout.into_parts();
    let (stderr, stderr_truncated) = stderr.into_parts();
    CapturedOutput {
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    }
}
