//! Child process spawning, bounded line reading and signalling
//!
//! This module is the process primitive the workers are built on: run a command,
//! hand back its standard output as a stream of bounded lines together with its
//! pid, and allow it to be signalled and reaped.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::error::ProcessError;

/// Longest line accepted from a plugin, in bytes. The rest of a longer line is
/// discarded.
pub const PLUGINSD_LINE_MAX: usize = 4096;

/// Fully materialized invocation of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    /// Passed to the plugin as its first argument.
    pub update_every: u64,
    /// Extra options appended verbatim.
    pub options: String,
    pub working_dir: PathBuf,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec {} {}", self.program.display(), self.update_every)?;
        let options = self.options.trim();
        if !options.is_empty() {
            write!(f, " {options}")?;
        }
        Ok(())
    }
}

/// Signals the supervisor sends to plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginSignal {
    /// Graceful termination request.
    Terminate,
    /// Wake a plugin that stopped itself.
    Continue,
}

impl PluginSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Continue => "SIGCONT",
        }
    }
}

/// A running plugin process.
#[async_trait]
pub trait PluginProcess: Send {
    /// Pid of the spawned child.
    fn pid(&self) -> u32;

    /// Next line of output without its line terminator, or `None` at end of
    /// stream.
    async fn next_line(&mut self) -> Result<Option<String>, ProcessError>;

    /// Send signals to `pid` from now on instead of the spawned child.
    fn redirect_signals(&mut self, pid: u32);

    fn signal(&mut self, signal: PluginSignal) -> Result<(), ProcessError>;

    /// Wait for the child to exit and return its exit code, if it had one.
    async fn reap(&mut self) -> Result<Option<i32>, ProcessError>;
}

/// Starts plugin processes.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, command: &CommandLine) -> Result<Box<dyn PluginProcess>, ProcessError>;
}

/// Spawns plugins through `/bin/sh -c "exec ..."`.
pub struct ShellSpawner {
    shell: PathBuf,
}

impl ShellSpawner {
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
        }
    }

    pub fn with_shell(mut self, shell: PathBuf) -> Self {
        self.shell = shell;
        self
    }
}

impl Default for ShellSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessSpawner for ShellSpawner {
    async fn spawn(&self, command: &CommandLine) -> Result<Box<dyn PluginProcess>, ProcessError> {
        let shell_command = command.to_string();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&shell_command)
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            command: shell_command.clone(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| ProcessError::MissingStream {
            command: shell_command.clone(),
            stream: "pid",
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ProcessError::MissingStream {
            command: shell_command.clone(),
            stream: "stdout",
        })?;

        debug!(pid, command = %shell_command, "Spawned plugin process");

        Ok(Box::new(ChildProcess {
            pid,
            signal_pid: pid,
            child,
            lines: Some(LineReader::new(BufReader::new(stdout), PLUGINSD_LINE_MAX)),
        }))
    }
}

/// A plugin running as a child of this process.
pub struct ChildProcess {
    pid: u32,
    signal_pid: u32,
    child: Child,
    /// Dropped on reap so a plugin still writing sees a closed pipe.
    lines: Option<LineReader<BufReader<ChildStdout>>>,
}

#[async_trait]
impl PluginProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn next_line(&mut self) -> Result<Option<String>, ProcessError> {
        match self.lines.as_mut() {
            Some(lines) => lines.next_line().await.map_err(ProcessError::Read),
            None => Ok(None),
        }
    }

    fn redirect_signals(&mut self, pid: u32) {
        self.signal_pid = pid;
    }

    fn signal(&mut self, signal: PluginSignal) -> Result<(), ProcessError> {
        send_signal(self.signal_pid, signal)
    }

    async fn reap(&mut self) -> Result<Option<i32>, ProcessError> {
        self.lines = None;
        let status = self.child.wait().await.map_err(|source| ProcessError::Reap {
            pid: self.pid,
            source,
        })?;
        Ok(status.code())
    }
}

/// Deliver `signal` to `pid`. A process that already exited is not an error.
pub fn send_signal(pid: u32, signal: PluginSignal) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return Ok(()),
    };
    let sig = match signal {
        PluginSignal::Terminate => Signal::SIGTERM,
        PluginSignal::Continue => Signal::SIGCONT,
    };

    debug!(pid, signal = signal.as_str(), "Signalling plugin");
    match kill(Pid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(ProcessError::Signal {
            pid,
            signal: signal.as_str(),
            source,
        }),
    }
}

/// Reads newline-terminated lines, keeping at most `max_len` bytes of each.
///
/// Bytes beyond the bound are dropped up to the next newline so an oversized
/// line never spills into the following one. A trailing `\n` is stripped;
/// invalid UTF-8 is replaced.
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    max_len: usize,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    pub fn new(inner: R, max_len: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(max_len.min(8192)),
            max_len,
        }
    }

    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        let mut read_any = false;
        let mut dropped = 0usize;

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if !read_any {
                    return Ok(None);
                }
                break;
            }
            read_any = true;

            let (chunk, consumed, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (&available[..pos], pos + 1, true),
                None => (available, available.len(), false),
            };

            let room = self.max_len.saturating_sub(self.buf.len());
            let keep = chunk.len().min(room);
            self.buf.extend_from_slice(&chunk[..keep]);
            dropped += chunk.len() - keep;

            self.inner.consume(consumed);
            if complete {
                break;
            }
        }

        if dropped > 0 {
            debug!(kept = self.buf.len(), dropped, "Truncated oversized plugin line");
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}
