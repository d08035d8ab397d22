//! Server process ownership
//!
//! A [`ServerSession`] owns exactly one spawned server and both ends of its
//! stdio pipes for its whole life. It knows nothing about JSON-RPC beyond
//! handing out request ids; the client builds envelopes on top.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::codec;
use crate::common::{Error, Result};

/// Lines of server stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// How to launch the server under test
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// One live server process and its pipes
pub struct ServerSession {
    child: Child,
    /// `None` once stdin has been closed by `stop`
    writer: Option<BufWriter<ChildStdin>>,
    reader: BufReader<ChildStdout>,
    /// Partial line left over from a read that timed out
    read_buf: Vec<u8>,
    next_request_id: i64,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl ServerSession {
    /// Spawn the server and make sure it survives the startup grace window
    pub async fn start(spec: &LaunchSpec, grace: Duration) -> Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        tracing::debug!(command = %spec.display(), "Spawning server process");

        let mut child = cmd.spawn().map_err(|e| {
            Error::Connection(format!("Failed to start {}: {}", spec.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Connection("Failed to get server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Connection("Failed to get server stdout".to_string()))?;

        let stderr_tail: StderrTail = Arc::new(Mutex::new(VecDeque::new()));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            // Reads to EOF whatever the bytes are; closing the pipe early
            // would SIGPIPE the server on its next stderr write
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf)
                                .trim_end_matches(['\r', '\n'])
                                .to_string();
                            tracing::debug!("server stderr: {}", line);
                            if let Ok(mut tail) = tail.lock() {
                                if tail.len() == STDERR_TAIL_LINES {
                                    tail.pop_front();
                                }
                                tail.push_back(line);
                            }
                        }
                        Err(e) => {
                            tracing::debug!("Failed to read server stderr: {}", e);
                            break;
                        }
                    }
                }
            })
        });

        let mut session = Self {
            child,
            writer: Some(BufWriter::new(stdin)),
            reader: BufReader::new(stdout),
            read_buf: Vec::new(),
            next_request_id: 1,
            stderr_tail,
            stderr_task,
            stopped: false,
        };

        if let Ok(waited) = tokio::time::timeout(grace, session.child.wait()).await {
            let status = waited.map_err(|e| {
                Error::Connection(format!("Failed to poll server process: {}", e))
            })?;
            session.stopped = true;
            session.drain_stderr().await;
            return Err(Error::Connection(format!(
                "Server exited during startup ({}){}",
                status,
                session.stderr_suffix()
            )));
        }

        tracing::debug!(pid = ?session.child.id(), "Server process started");
        Ok(session)
    }

    /// Allocate the next request id; ids start at 1 and are never reused
    pub fn allocate_request_id(&mut self) -> i64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Write one newline-terminated line and flush
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        if let Some(status) = self.exit_status() {
            return Err(self.exited_error(status));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Connection("Server stdin is closed".to_string()))?;

        match codec::write_line(writer, line).await {
            Ok(()) => Ok(()),
            Err(Error::Io(e)) => Err(Error::Connection(format!(
                "Failed to write to server: {}{}",
                e,
                self.stderr_suffix()
            ))),
            Err(e) => Err(e),
        }
    }

    /// Wait up to `timeout` for one line of server output
    pub async fn read_line(&mut self, timeout: Duration) -> Result<String> {
        let read = codec::read_line(&mut self.reader, &mut self.read_buf);
        match tokio::time::timeout(timeout, read).await {
            Err(_) => Err(Error::RequestTimeout(timeout)),
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => {
                tracing::debug!("Server stdout closed{}", self.stderr_suffix());
                Err(Error::ConnectionClosed)
            }
            Ok(Err(Error::Io(e))) => Err(Error::Connection(format!(
                "Failed to read from server: {}",
                e
            ))),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Non-blocking liveness check of the process itself
    pub fn is_alive(&mut self) -> bool {
        self.exit_status().is_none()
    }

    /// Terminate the server: close stdin, SIGTERM, wait `grace`, then kill
    ///
    /// Idempotent, and a no-op if the process already exited.
    pub async fn stop(&mut self, grace: Duration) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        // Dropping the writer closes the pipe
        self.writer.take();

        if self.exit_status().is_none() {
            #[cfg(unix)]
            {
                if let Some(pid) = self.child.id() {
                    // SAFETY: pid belongs to our own child, which has not been reaped
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }

            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("Server exited: {}", status),
                Ok(Err(e)) => tracing::warn!("Failed to wait for server: {}", e),
                Err(_) => {
                    tracing::warn!(
                        "Server did not exit within {}ms, killing it",
                        grace.as_millis()
                    );
                    if let Err(e) = self.child.kill().await {
                        tracing::warn!("Failed to kill server: {}", e);
                    }
                }
            }
        }

        self.drain_stderr().await;
    }

    /// Last lines the server wrote to stderr
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    fn exited_error(&self, status: ExitStatus) -> Error {
        Error::Connection(format!(
            "Server has exited ({}){}",
            status,
            self.stderr_suffix()
        ))
    }

    fn stderr_suffix(&self) -> String {
        let tail = self.stderr_tail();
        if tail.is_empty() {
            String::new()
        } else {
            format!("; stderr: {}", tail.join(" | "))
        }
    }

    /// Give the stderr task a moment to catch the last lines of a dead server
    async fn drain_stderr(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(Duration::from_millis(200), task).await.is_err() {
                abort.abort();
            }
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        if !self.stopped {
            // Best-effort since we can't await in drop
            let _ = self.child.start_kill();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
