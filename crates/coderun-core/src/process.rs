//! Bounded external processes.
//!
//! [`BoundedProcess`] is the process runner shared by the compile and execute
//! stages:
//!
//! - The child leads its own process group, so every process it forks can be
//!   signalled at once. Processes that leave the group are out of reach here;
//!   containing those is the sandbox's job.
//! - stdout and stderr are drained concurrently, keeping at most
//!   `max_output_bytes` of each; the rest is read and discarded so the child
//!   never blocks on a full pipe. If something outside the group keeps a pipe
//!   open, whatever was captured so far is kept and the stream is marked
//!   truncated.
//! - When the deadline passes the group gets `SIGTERM`, then `SIGKILL` once
//!   the grace period runs out. A zero grace period kills immediately.
//! - After the leader exits the group is killed anyway, so nothing it left
//!   running in the background outlives the stage.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use coderun_common::TIMEOUT_EXIT_CODE;

/// How long to wait for the output readers once the group is gone.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Outcome of one bounded process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageResult {
    /// The process exited with status 0 before its deadline.
    pub success: bool,
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, one entry per line.
    pub stderr_lines: Vec<String>,
    /// Exit status, `128 + signal` for signal deaths, or
    /// [`TIMEOUT_EXIT_CODE`] when killed at the deadline.
    pub exit_code: i32,
    /// Wall-clock time from spawn to exit.
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    /// The deadline passed and the process group was killed.
    pub timed_out: bool,
    /// stdout or stderr exceeded the capture limit.
    pub output_truncated: bool,
}

/// Serializes a [`Duration`] as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A reader task draining one pipe into a buffer it shares with the waiter.
#[derive(Debug)]
struct OutputReader {
    buffer: Arc<Mutex<Captured>>,
    task: JoinHandle<io::Result<()>>,
}

impl OutputReader {
    fn spawn<R>(reader: R, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let task = tokio::spawn(read_capped(reader, limit, Arc::clone(&buffer)));
        Self { buffer, task }
    }

    /// Wait briefly for end of stream and return what was captured.
    ///
    /// A reader still blocked after [`READER_JOIN_TIMEOUT`] is aborted; its
    /// partial capture is returned marked as truncated.
    async fn finish(self, stream: &'static str) -> Captured {
        let Self { buffer, mut task } = self;

        match timeout(READER_JOIN_TIMEOUT, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(stream, error = %e, "Failed reading process output"),
            Ok(Err(e)) => warn!(stream, error = %e, "Output reader task failed"),
            Err(_) => {
                warn!(stream, "Output still open after process exit, keeping partial capture");
                task.abort();
                buffer.lock().truncated = true;
            }
        }

        std::mem::take(&mut *buffer.lock())
    }
}

/// A spawned child with its output readers.
#[derive(Debug)]
pub struct BoundedProcess {
    child: Child,
    pid: Option<u32>,
    stdout: OutputReader,
    stderr: OutputReader,
    started: Instant,
}

impl BoundedProcess {
    /// Spawn `command` in a new process group with piped output.
    ///
    /// stdin is closed and `kill_on_drop` is set. The group is created
    /// before any `pre_exec` hook installed on `command` runs, so processes
    /// those hooks fork stay in it.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if the program cannot be started.
    pub fn spawn(command: &mut Command, max_output_bytes: usize) -> io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command.spawn()?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("child stderr was not captured"))?;

        debug!(pid = ?pid, "Process spawned");

        Ok(Self {
            child,
            pid,
            stdout: OutputReader::spawn(stdout, max_output_bytes),
            stderr: OutputReader::spawn(stderr, max_output_bytes),
            started,
        })
    }

    /// OS process id of the group leader, if it has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process under `limit`, escalating to a kill afterwards.
    ///
    /// `grace` is how long the group gets between `SIGTERM` and `SIGKILL`.
    ///
    /// # Errors
    ///
    /// Returns an error only if waiting on the child itself fails.
    pub async fn wait(mut self, limit: Duration, grace: Duration) -> io::Result<StageResult> {
        let (status, timed_out) = match timeout(limit, self.child.wait()).await {
            Ok(status) => (status?, false),
            Err(_) => {
                warn!(
                    pid = ?self.pid,
                    limit_ms = limit.as_millis(),
                    "Process exceeded its time limit, terminating group"
                );
                (self.terminate(grace).await?, true)
            }
        };
        let duration = self.started.elapsed();

        // Whatever the leader left behind goes with it.
        self.signal_group(GroupSignal::Kill);

        let (stdout, stderr) = tokio::join!(
            self.stdout.finish("stdout"),
            self.stderr.finish("stderr")
        );

        let exit_code = if timed_out {
            TIMEOUT_EXIT_CODE
        } else {
            exit_code_of(status)
        };

        debug!(
            pid = ?self.pid,
            exit_code,
            duration_ms = duration.as_millis(),
            timed_out,
            "Process finished"
        );

        Ok(StageResult {
            success: !timed_out && status.success(),
            stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
            stderr_lines: String::from_utf8_lossy(&stderr.bytes)
                .lines()
                .map(str::to_string)
                .collect(),
            exit_code,
            duration,
            timed_out,
            output_truncated: stdout.truncated || stderr.truncated,
        })
    }

    async fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        if !grace.is_zero() {
            self.signal_group(GroupSignal::Term);
            if let Ok(status) = timeout(grace, self.child.wait()).await {
                return status;
            }
            warn!(pid = ?self.pid, "Grace period elapsed, killing group");
        }

        self.signal_group(GroupSignal::Kill);
        // Covers a leader that already left the group.
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "start_kill after group kill");
        }
        self.child.wait().await
    }

    fn signal_group(&self, signal: GroupSignal) {
        if let Some(pid) = self.pid {
            signal_process_group(pid, signal);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_process_group(pid: u32, signal: GroupSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Term => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = raw, signal = %signal, error = %e, "Failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn signal_process_group(_pid: u32, _signal: GroupSignal) {}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

async fn read_capped<R>(mut reader: R, limit: usize, buffer: Arc<Mutex<Captured>>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }

        let mut captured = buffer.lock();
        let room = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(room);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        if keep < n {
            captured.truncated = true;
        }
    }
}
