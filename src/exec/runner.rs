// src/exec/runner.rs

//! Supervised external process with a merged, line-oriented output stream.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{JobsError, Result};

const LINE_CHANNEL_CAPACITY: usize = 256;

/// What to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub work_dir: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: work_dir.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of process output, with the trailing newline stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Natural exit with this code.
    Code(i32),
    /// Terminated through [`ProcessHandle::kill`].
    Killed,
    /// Terminated by a signal nobody here sent.
    Signaled(i32),
}

impl ExitStatus {
    pub fn success(self) -> bool {
        self == ExitStatus::Code(0)
    }
}

/// What the process did next: printed a line, or exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Line(OutputLine),
    Exited(ExitStatus),
}

/// Starts download tool processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Spawn `spec` with piped stdout/stderr and start draining both.
    ///
    /// On unix the tool leads its own process group, so killing it also
    /// reaches whatever it spawned.
    ///
    /// If spawning fails nothing is left behind: no child exists and the
    /// pipes were never created.
    pub fn start(&self, spec: &CommandSpec) -> Result<ProcessHandle> {
        info!(
            program = %spec.program.display(),
            args = ?spec.args,
            work_dir = %spec.work_dir.display(),
            "starting download tool"
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning '{}'", spec.program.display()))
            .map_err(|e| JobsError::LaunchFailed(format!("{e:#}")))?;

        let pid = child.id();
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, OutputStream::Stderr, tx));
        }

        debug!(?pid, "download tool spawned");

        Ok(ProcessHandle {
            child,
            pid,
            lines: rx,
            readers,
            output_closed: false,
            kill_requested: false,
            group_reclaimed: false,
            status: None,
        })
    }
}

/// Read `pipe` until EOF, forwarding each line. Carriage returns split
/// lines too, since progress meters redraw in place with `\r`.
fn spawn_line_reader<R>(
    pipe: R,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let raw = String::from_utf8_lossy(&buf);
                    for segment in raw.split(['\r', '\n']) {
                        if segment.trim().is_empty() {
                            continue;
                        }
                        let line = OutputLine {
                            stream,
                            text: segment.to_string(),
                        };
                        if tx.send(line).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!(?stream, error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    })
}

/// A running (or finished) download tool process.
///
/// Dropping the handle kills the process group if that was not done yet and
/// stops the pipe readers; the runtime reaps the child afterwards.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    lines: mpsc::Receiver<OutputLine>,
    readers: Vec<JoinHandle<()>>,
    output_closed: bool,
    kill_requested: bool,
    group_reclaimed: bool,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next line from stdout or stderr, or `None` once both pipes closed.
    ///
    /// Cancel-safe: dropping the future loses no line.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    /// Next output line, or the exit status once the process has exited.
    ///
    /// Buffered lines come first, but output written just before the exit
    /// can still be in flight when `Exited` is returned; read it with
    /// [`next_line`](Self::next_line). A descendant holding the pipes open
    /// does not delay `Exited`. Cancel-safe.
    pub async fn next_event(&mut self) -> Result<ProcessEvent> {
        enum Step {
            Line(Option<OutputLine>),
            Exit(std::io::Result<std::process::ExitStatus>),
        }

        if self.status.is_none() && !self.output_closed {
            let step = tokio::select! {
                biased;
                line = self.lines.recv() => Step::Line(line),
                raw = self.child.wait() => Step::Exit(raw),
            };
            match step {
                Step::Line(Some(line)) => return Ok(ProcessEvent::Line(line)),
                Step::Line(None) => self.output_closed = true,
                Step::Exit(raw) => {
                    let raw = raw.context("waiting for download tool")?;
                    return Ok(ProcessEvent::Exited(self.record_exit(raw)));
                }
            }
        }
        self.wait().await.map(ProcessEvent::Exited)
    }

    /// Wait for the process to exit. The child is reaped once; later calls
    /// return the cached status.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let raw = self
            .child
            .wait()
            .await
            .context("waiting for download tool")?;
        Ok(self.record_exit(raw))
    }

    fn record_exit(&mut self, raw: std::process::ExitStatus) -> ExitStatus {
        let status = self.classify(raw);
        self.status = Some(status);
        debug!(pid = ?self.pid, ?status, "download tool exited");
        status
    }

    /// Ask the OS to kill the process and everything in its process group.
    /// Calling this again does nothing; after the process exited only its
    /// leftover descendants are signalled.
    pub fn kill(&mut self) -> Result<()> {
        let group = self.kill_descendants();
        if self.kill_requested || self.status.is_some() {
            return group;
        }
        self.kill_requested = true;
        match self.child.start_kill() {
            Ok(()) => {}
            // Already reaped by tokio: nothing left to kill.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(JobsError::IoError(e)),
        }
        if let Err(e) = group {
            warn!(
                pid = ?self.pid,
                error = %e,
                "could not signal process group; killed the tool only"
            );
        }
        Ok(())
    }

    /// SIGKILL the tool's process group, once. Used after a natural exit to
    /// take down anything the tool left running.
    pub fn kill_descendants(&mut self) -> Result<()> {
        if self.group_reclaimed {
            return Ok(());
        }
        self.group_reclaimed = true;
        match self.pid {
            Some(pid) => kill_group(pid).map_err(JobsError::IoError),
            None => Ok(()),
        }
    }

    /// Kill and wait up to `grace` for the reap.
    ///
    /// Returns `None` if the process did not go away in time; it is still
    /// killed on drop.
    pub async fn kill_and_wait(&mut self, grace: Duration) -> Result<Option<ExitStatus>> {
        self.kill()?;
        match tokio::time::timeout(grace, self.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => {
                warn!(
                    pid = ?self.pid,
                    ?grace,
                    "download tool not reaped within kill grace period"
                );
                Ok(None)
            }
        }
    }

    fn classify(&self, raw: std::process::ExitStatus) -> ExitStatus {
        if let Some(code) = raw.code() {
            return ExitStatus::Code(code);
        }
        if self.kill_requested {
            return ExitStatus::Killed;
        }
        signal_of(&raw)
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(pid) else {
        return Ok(());
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // Group already empty.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(std::io::Error::from(e)),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn signal_of(raw: &std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::Signaled(raw.signal().unwrap_or(-1))
}

#[cfg(not(unix))]
fn signal_of(_raw: &std::process::ExitStatus) -> ExitStatus {
    ExitStatus::Code(-1)
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Err(e) = self.kill_descendants() {
            debug!(pid = ?self.pid, error = %e, "failed to kill process group on drop");
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}
