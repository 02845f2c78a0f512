//! Monitoring sessions: one engine process bound to one (group, formula) pair
//!
//! A session streams events into the engine's stdin, one line per event, and
//! reports what the engine says through a channel of [`SessionEvent`]s:
//!
//! - stdout lines starting with `@` are violations
//! - stderr lines mentioning an error are engine errors
//! - the process exit (code and remaining stderr) is reported exactly once,
//!   always as the last event
//!
//! The subprocess is torn down on every exit path. Dropping a session that was
//! not closed kills the engine and still reports its exit.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use super::command::{render_command, EngineCommand, RSS_REPORT_PREFIX};
use super::error::SessionError;
use crate::process::{
    capture_stream, signal_process, terminate_child, Signal, ENGINE_OUTPUT_LIMIT,
    TERMINATION_GRACE,
};

/// Time to wait for the pipe readers after the engine exited
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// What the engine reported, in the order it was observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Violation(String),
    Error(String),
    Exit { code: Option<i32>, stderr: String },
}

/// Result of feeding one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted,
    /// The engine no longer reads its input (it stopped after a violation).
    /// Further submissions are ignored.
    Closed,
}

/// How a finished session ended
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub exit_code: Option<i32>,
    pub peak_rss_kb: Option<u64>,
    pub duration: Duration,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy)]
enum FinishMode {
    /// Close stdin and wait for the engine within the remaining time budget
    Wait,
    /// Tear the engine down after a fault
    Kill,
    /// Tear the engine down because the time budget is spent
    TimedOut,
}

pub struct MonitorSession {
    name: String,
    cmd: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout_done: Option<Receiver<()>>,
    stderr_done: Option<Receiver<String>>,
    events: Sender<SessionEvent>,
    started: Instant,
    timeout: Duration,
    watchdog: Watchdog,
    summary: Option<SessionSummary>,
}

impl MonitorSession {
    /// Spawn the engine for `command`.
    ///
    /// Returns the session together with the receiving end of its event
    /// channel. The receiver stays usable after the session is gone.
    pub fn spawn(
        name: &str,
        command: &EngineCommand,
        timeout: Duration,
    ) -> Result<(Self, Receiver<SessionEvent>), SessionError> {
        let argv = command.argv();
        let cmd = render_command(&argv);
        let (program, args) = argv.split_first().ok_or_else(|| SessionError::Engine {
            cmd: cmd.clone(),
            message: "empty command line".to_string(),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(command.workdir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SessionError::Spawn {
                cmd: cmd.clone(),
                source,
            })?;

        let (events, receiver) = mpsc::channel();

        let stdout_done = child.stdout.take().map(|stdout| {
            let (done_tx, done_rx) = mpsc::channel();
            let tx = events.clone();
            thread::spawn(move || {
                forward_stdout(stdout, &tx);
                let _ = done_tx.send(());
            });
            done_rx
        });

        let stderr_done = child.stderr.take().map(|stderr| {
            let (done_tx, done_rx) = mpsc::channel();
            let tx = events.clone();
            thread::spawn(move || {
                let _ = done_tx.send(forward_stderr(stderr, &tx));
            });
            done_rx
        });

        let watchdog = Watchdog::start(name, child.id(), timeout);
        info!(session = name, "Started engine: {cmd}");

        Ok((
            Self {
                name: name.to_string(),
                cmd,
                stdin: child.stdin.take(),
                child,
                stdout_done,
                stderr_done,
                events,
                started: Instant::now(),
                timeout,
                watchdog,
                summary: None,
            },
            receiver,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rendered command line of the spawned engine
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// Feed one event to the engine, preserving submission order
    pub fn submit(&mut self, event: &str) -> Result<Submission, SessionError> {
        if self.summary.is_some() || self.stdin.is_none() {
            return Ok(Submission::Closed);
        }

        if self.watchdog.expired() || self.started.elapsed() > self.timeout {
            self.finish(FinishMode::TimedOut);
            return Err(self.timeout_error());
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Ok(Submission::Closed);
        };

        match write_line(stdin, event) {
            Ok(()) => Ok(Submission::Accepted),
            // The watchdog killed the engine while the write was blocked
            Err(_) if self.watchdog.expired() => {
                self.finish(FinishMode::TimedOut);
                Err(self.timeout_error())
            }
            Err(e) if is_input_closed(&e) => {
                debug!(session = %self.name, "Engine closed its input");
                self.stdin = None;
                Ok(Submission::Closed)
            }
            Err(e) => Err(SessionError::Engine {
                cmd: self.cmd.clone(),
                message: format!("failed to write event: {e}"),
            }),
        }
    }

    /// Signal end of input and wait for the engine to exit.
    ///
    /// Fails with [`SessionError::Timeout`] if the engine had to be killed
    /// because the session exceeded its hard timeout.
    pub fn close(mut self) -> Result<SessionSummary, SessionError> {
        let summary = self.finish(FinishMode::Wait);
        if summary.timed_out {
            return Err(self.timeout_error());
        }
        Ok(summary)
    }

    /// Tear the engine down without waiting for it to drain its input
    pub fn abort(mut self) -> SessionSummary {
        self.finish(FinishMode::Kill)
    }

    fn timeout_error(&self) -> SessionError {
        SessionError::Timeout {
            cmd: self.cmd.clone(),
            timeout: self.timeout,
        }
    }

    fn finish(&mut self, mode: FinishMode) -> SessionSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }

        drop(self.stdin.take());

        // Disarm before reaping so the watchdog never signals a recycled pid
        let mode = if self.watchdog.disarm() {
            FinishMode::TimedOut
        } else {
            mode
        };

        let (exit_code, timed_out) = match mode {
            FinishMode::Wait => {
                let remaining = self.timeout.saturating_sub(self.started.elapsed());
                match self.child.wait_timeout(remaining) {
                    Ok(Some(status)) => (status.code(), false),
                    Ok(None) => (terminate_child(&mut self.child, TERMINATION_GRACE), true),
                    Err(e) => {
                        warn!(session = %self.name, "Failed to wait for engine: {e}");
                        (terminate_child(&mut self.child, TERMINATION_GRACE), false)
                    }
                }
            }
            FinishMode::Kill => (terminate_child(&mut self.child, TERMINATION_GRACE), false),
            FinishMode::TimedOut => (terminate_child(&mut self.child, TERMINATION_GRACE), true),
        };

        if let Some(done) = self.stdout_done.take() {
            if done.recv_timeout(READER_JOIN_TIMEOUT).is_err() {
                warn!(session = %self.name, "Engine stdout was not drained in time");
            }
        }
        let raw_stderr = self
            .stderr_done
            .take()
            .and_then(|done| done.recv_timeout(READER_JOIN_TIMEOUT).ok())
            .unwrap_or_default();
        let (peak_rss_kb, stderr) = split_rss_report(&raw_stderr);

        let summary = SessionSummary {
            exit_code,
            peak_rss_kb,
            duration: self.started.elapsed(),
            timed_out,
        };

        info!(
            session = %self.name,
            exit_code = ?summary.exit_code,
            timed_out,
            "Engine finished after {:.2}s",
            summary.duration.as_secs_f64()
        );

        // Exit is reported once: `summary` is set right after
        let _ = self.events.send(SessionEvent::Exit {
            code: exit_code,
            stderr,
        });
        self.summary = Some(summary.clone());
        summary
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        if self.summary.is_none() {
            self.finish(FinishMode::Kill);
        }
    }
}

/// Tears the engine down once the session's time budget is spent, whether or
/// not the session is blocked writing to the engine's stdin
struct Watchdog {
    cancel: Option<Sender<()>>,
    expired: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    fn start(session: &str, pid: u32, timeout: Duration) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let expired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&expired);
        let session = session.to_string();

        let handle = thread::spawn(move || {
            if !matches!(cancelled.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)) {
                return;
            }
            flag.store(true, Ordering::SeqCst);
            warn!(session = %session, "Engine exceeded its hard timeout, terminating");
            signal_process(pid, Signal::SIGTERM);
            if matches!(
                cancelled.recv_timeout(TERMINATION_GRACE),
                Err(RecvTimeoutError::Timeout)
            ) {
                signal_process(pid, Signal::SIGKILL);
            }
        });

        Self {
            cancel: Some(cancel),
            expired,
            handle: Some(handle),
        }
    }

    fn expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    /// Stop watching; returns whether the deadline had already passed
    fn disarm(&mut self) -> bool {
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.expired()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn write_line(stdin: &mut ChildStdin, event: &str) -> io::Result<()> {
    stdin.write_all(event.as_bytes())?;
    if !event.ends_with('\n') {
        stdin.write_all(b"\n")?;
    }
    stdin.flush()
}

fn is_input_closed(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero
    )
}

fn forward_stdout<R: Read>(stdout: R, tx: &Sender<SessionEvent>) {
    for line in BufReader::new(stdout).lines().map_while(Result::ok) {
        if let Some(event) = classify_stdout(&line) {
            // Keep draining even if nobody listens, so the engine never blocks
            let _ = tx.send(event);
        }
    }
}

fn forward_stderr<R: Read>(stderr: R, tx: &Sender<SessionEvent>) -> String {
    let text = capture_stream(stderr, ENGINE_OUTPUT_LIMIT);
    for line in text.lines() {
        if let Some(event) = classify_stderr(line) {
            let _ = tx.send(event);
        }
    }
    text
}

/// Violation reports are the only stdout lines of interest
pub fn classify_stdout(line: &str) -> Option<SessionEvent> {
    let line = line.trim_end();
    if line.starts_with('@') {
        Some(SessionEvent::Violation(line.to_string()))
    } else {
        if !line.is_empty() {
            debug!("engine stdout: {line}");
        }
        None
    }
}

pub fn classify_stderr(line: &str) -> Option<SessionEvent> {
    let line = line.trim_end();
    if line.starts_with(RSS_REPORT_PREFIX) {
        return None;
    }
    if line.to_lowercase().contains("error") {
        Some(SessionEvent::Error(line.to_string()))
    } else {
        None
    }
}

/// Separate the RSS wrapper's report from the engine's own stderr
pub fn split_rss_report(stderr: &str) -> (Option<u64>, String) {
    let mut peak = None;
    let mut rest = Vec::new();
    for line in stderr.lines() {
        match line.trim().strip_prefix(RSS_REPORT_PREFIX) {
            Some(value) => peak = value.trim().parse().ok().or(peak),
            None => rest.push(line),
        }
    }
    (peak, rest.join("\n"))
}
