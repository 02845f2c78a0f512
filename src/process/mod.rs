//! Process utilities for the engine wrappers
//!
//! Bounded command execution and child termination shared by monitoring
//! sessions and one-shot engine queries.

use nix::sys::signal::kill;
pub use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Timeout for collecting output from child process pipes
const OUTPUT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes of engine output kept per stream
pub const ENGINE_OUTPUT_LIMIT: usize = 4 * 1024 * 1024;

/// How long a child gets to exit after SIGTERM before it is killed
pub const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Output of a command run to completion (or until its timeout)
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub timed_out: bool,
}

/// Run `argv` in `working_dir` with stdin closed, capturing both output streams.
///
/// The process is killed when it exceeds `timeout`; the result then has
/// `timed_out` set and no exit code.
pub fn run_with_timeout(
    argv: &[String],
    working_dir: &Path,
    timeout: Duration,
) -> io::Result<CommandOutput> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

    let start = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain both pipes while waiting, otherwise a chatty child blocks on a full pipe
    let (stdout_tx, stdout_rx) = mpsc::channel();
    let (stderr_tx, stderr_rx) = mpsc::channel();

    match child.stdout.take() {
        Some(stdout) => {
            thread::spawn(move || {
                let _ = stdout_tx.send(capture_stream(stdout, ENGINE_OUTPUT_LIMIT));
            });
        }
        None => {
            let _ = stdout_tx.send(String::new());
        }
    }
    match child.stderr.take() {
        Some(stderr) => {
            thread::spawn(move || {
                let _ = stderr_tx.send(capture_stream(stderr, ENGINE_OUTPUT_LIMIT));
            });
        }
        None => {
            let _ = stderr_tx.send(String::new());
        }
    }

    let status = child.wait_timeout(timeout)?;
    if status.is_none() {
        terminate_child(&mut child, Duration::ZERO);
    }

    let stdout = stdout_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_else(|_| "[engine output not collected in time]".to_string());
    let stderr = stderr_rx
        .recv_timeout(OUTPUT_COLLECTION_TIMEOUT)
        .unwrap_or_else(|_| "[engine output not collected in time]".to_string());

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code: status.and_then(|s| s.code()),
        duration: start.elapsed(),
        timed_out: status.is_none(),
    })
}

/// Send `signal` to process `pid`.
///
/// Only valid while the process is not yet reaped, otherwise the pid may
/// belong to someone else.
pub fn signal_process(pid: u32, signal: Signal) {
    if let Ok(pid) = i32::try_from(pid) {
        // ESRCH just means it already exited
        let _ = kill(Pid::from_raw(pid), signal);
    }
}

/// Terminate a child process and reap it.
///
/// Sends SIGTERM first and escalates to SIGKILL once `grace` has passed.
/// Returns the exit code if the child exited normally in the meantime.
pub fn terminate_child(child: &mut Child, grace: Duration) -> Option<i32> {
    if let Ok(Some(status)) = child.try_wait() {
        return status.code();
    }

    if !grace.is_zero() {
        signal_process(child.id(), Signal::SIGTERM);
        if let Ok(Some(status)) = child.wait_timeout(grace) {
            return status.code();
        }
    }

    let _ = child.kill();
    child.wait().ok().and_then(|s| s.code())
}

/// Capture what an engine writes on one of its output streams.
///
/// Keeps the first `limit` bytes; the rest is still read so the engine never
/// blocks on a full pipe, and the number of dropped bytes is noted at the end.
pub fn capture_stream<R: Read>(mut stream: R, limit: usize) -> String {
    let mut kept = Vec::new();
    let read = stream.by_ref().take(limit as u64).read_to_end(&mut kept);
    let dropped = io::copy(&mut stream, &mut io::sink()).unwrap_or(0);

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if let Err(e) = read {
        text.push_str(&format!("\n[engine output unreadable: {e}]"));
    } else if dropped > 0 {
        text.push_str(&format!("\n[engine output clipped, {dropped} bytes dropped]"));
    }
    text
}
