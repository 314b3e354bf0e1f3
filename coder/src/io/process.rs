//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long output may keep draining after the deadline or a kill.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Lossy UTF-8 stdout with a truncation notice appended when bytes were dropped.
    pub fn stdout_text(&self) -> String {
        with_notice(&self.stdout, self.stdout_truncated, "stdout")
    }

    pub fn stderr_text(&self) -> String {
        with_notice(&self.stderr, self.stderr_truncated, "stderr")
    }
}

/// Run a command with a hard timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Stdin is closed. On Unix the child leads its own process group, and the
/// whole group is killed on timeout, so a shell's descendants die with it.
/// Output draining never outlives the deadline by more than a short grace:
/// when a descendant keeps the pipes open past it, the group is killed, the
/// result is marked timed out and whatever was read so far is returned.
/// `output_limit_bytes` bounds the amount of stdout/stderr stored in memory.
#[instrument(skip_all, fields(timeout_ms = timeout.as_millis() as u64, output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout = StreamCapture::spawn(stdout, output_limit_bytes);
    let stderr = StreamCapture::spawn(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing"
            );
            timed_out = true;
            kill_tree(&mut child).context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let deadline = (started + timeout).max(Instant::now()) + DRAIN_GRACE;
    let stdout = stdout.finish(deadline).context("collect stdout")?;
    let stderr = stderr.finish(deadline).context("collect stderr")?;
    if !(stdout.closed && stderr.closed) {
        warn!("output pipes still open past the deadline, killing process group");
        timed_out = true;
        kill_process_group(child.id());
    }

    if stdout.truncated > 0 || stderr.truncated > 0 {
        warn!(
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.truncated,
        stderr_truncated: stderr.truncated,
        timed_out,
    })
}

fn with_notice(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]\n"));
    }
    text
}

/// Build a platform shell invocation for a command line.
pub fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command_line);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command_line);
        cmd
    }
}

fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    kill_process_group(child.id());
    child.kill()
}

#[cfg(unix)]
fn kill_process_group(group: u32) {
    // A negative pid addresses every process in the group.
    let status = Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{group}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => debug!(group, "process group killed"),
        Ok(status) => debug!(group, code = ?status.code(), "process group already gone"),
        Err(err) => warn!(group, err = %err, "failed to run kill for process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: u32) {}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// What one stream produced by the time collection stopped.
#[derive(Debug)]
struct StreamOutput {
    bytes: Vec<u8>,
    truncated: usize,
    /// The stream reached end of file.
    closed: bool,
}

/// A reader thread filling a shared buffer, plus a signal for when it is done.
struct StreamCapture {
    shared: Arc<Mutex<Captured>>,
    done: mpsc::Receiver<Result<()>>,
}

impl StreamCapture {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let shared = Arc::new(Mutex::new(Captured::default()));
        let sink = Arc::clone(&shared);
        let (tx, done) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(read_stream_limited(reader, limit, &sink));
        });
        Self { shared, done }
    }

    /// Wait for end of file until `deadline`, then take whatever was read.
    fn finish(self, deadline: Instant) -> Result<StreamOutput> {
        let wait = deadline.saturating_duration_since(Instant::now());
        let closed = match self.done.recv_timeout(wait) {
            Ok(result) => {
                result?;
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        };
        let mut captured = self
            .shared
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        Ok(StreamOutput {
            bytes: std::mem::take(&mut captured.bytes),
            truncated: captured.truncated,
            closed,
        })
    }
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    sink: &Mutex<Captured>,
) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = sink
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        let remaining = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(remaining);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }
}
