//! Child-process invocation with streamed stdout decoding.
//!
//! Each call is a single async task: spawn, stream stdout through the
//! framing decoder (forwarding progress as soon as it is decoded), collect
//! stderr on the side for diagnostics, and resolve once the child exits,
//! times out, or is cancelled. A killed child never leaves the call pending.

use crate::errors::InvokeError;
use crate::progress::JobProgress;
use crate::protocol::{FragmentPolicy, LineProtocolReader};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

/// How long stderr may stay open after the child has exited.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// How to launch an external tool: an executable, or an interpreter plus script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    /// Passed as the first argument, before any call arguments
    pub script: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: None,
        }
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Human-readable command line prefix, for logs.
    pub fn display(&self) -> String {
        match &self.script {
            Some(script) => format!("{} {}", self.program.display(), script.display()),
            None => self.program.display().to_string(),
        }
    }
}

/// How stdout is turned into a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Analyzer line protocol: progress lines are split out, the rest is payload.
    Lines(FragmentPolicy),
    /// Whole stdout is the payload, byte for byte.
    Raw,
}

/// Everything observed from one finished child.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code, or -1 when the child was terminated by a signal
    pub exit_code: i32,
    pub payload: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Interpret a finished run as one JSON document.
    pub fn into_json(self) -> Result<Value, InvokeError> {
        if !self.success() {
            return Err(InvokeError::Exit {
                code: self.exit_code,
                stderr: self.stderr,
            });
        }
        serde_json::from_str(&self.payload).map_err(|source| InvokeError::PayloadParse {
            payload: self.payload,
            source,
        })
    }
}

/// Launches one kind of external tool.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    spec: CommandSpec,
    framing: Framing,
    timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
}

enum Finish {
    Exited(std::io::Result<ExitStatus>),
    Interrupted(Interrupt),
}

enum Interrupt {
    Cancelled,
    TimedOut(Duration),
}

impl ProcessInvoker {
    pub fn new(spec: CommandSpec, framing: Framing) -> Self {
        Self {
            spec,
            framing,
            timeout: None,
            working_dir: None,
        }
    }

    /// Fail with `InvokeError::Timeout` once `timeout` has elapsed since spawn,
    /// killing the child if it is still running.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Run the tool to completion.
    ///
    /// Resolves `Ok` for any exit code; the caller decides what a non-zero
    /// exit means. Progress frames go to `progress` as they are decoded.
    pub async fn run(
        &self,
        args: &[String],
        progress: Option<&JobProgress>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, InvokeError> {
        let start = Instant::now();
        let program = self.spec.display();

        let mut cmd = Command::new(&self.spec.program);
        if let Some(script) = &self.spec.script {
            cmd.arg(script);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| InvokeError::Spawn {
            program: program.clone(),
            source,
        })?;
        debug!(program = %program, pid = child.id().unwrap_or(0), ?args, "process spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| InvokeError::Io(std::io::Error::other("stdout was not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| InvokeError::Io(std::io::Error::other("stderr was not captured")))?;
        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut stderr_task = tokio::spawn(collect_into(stderr, Arc::clone(&captured)));

        let mut sink = PayloadSink::new(self.framing);
        let finish = {
            let pump = pump_stdout(&mut child, stdout, &mut sink, progress);
            tokio::select! {
                status = pump => Finish::Exited(status),
                _ = cancel.cancelled() => Finish::Interrupted(Interrupt::Cancelled),
                after = expiry(start, self.timeout) => {
                    Finish::Interrupted(Interrupt::TimedOut(after))
                }
            }
        };

        let status = match finish {
            Finish::Exited(Ok(status)) => status,
            Finish::Exited(Err(e)) => {
                stderr_task.abort();
                return Err(InvokeError::Io(e));
            }
            Finish::Interrupted(why) => {
                return Err(interrupt(&program, &mut child, &stderr_task, why).await);
            }
        };

        // A descendant can keep stderr open after the child exits.
        let drain = tokio::select! {
            _ = &mut stderr_task => None,
            _ = tokio::time::sleep(STDERR_GRACE) => None,
            _ = cancel.cancelled() => Some(Interrupt::Cancelled),
            after = expiry(start, self.timeout) => Some(Interrupt::TimedOut(after)),
        };
        if let Some(why) = drain {
            return Err(interrupt(&program, &mut child, &stderr_task, why).await);
        }
        if !stderr_task.is_finished() {
            debug!(program = %program, "stderr still held open after exit, keeping what was read");
            stderr_task.abort();
        }

        let stderr = captured_text(&captured);
        let exit_code = status.code().unwrap_or(-1);
        let duration = start.elapsed();

        if exit_code == 0 {
            debug!(program = %program, elapsed_ms = duration.as_millis() as u64, "process finished");
        } else {
            warn!(program = %program, exit_code, stderr = %stderr.trim(), "process exited abnormally");
        }
        if !stderr.trim().is_empty() {
            debug!(program = %program, stderr = %stderr.trim(), "process stderr");
        }

        Ok(ProcessOutput {
            exit_code,
            payload: sink.into_payload(),
            stderr,
            duration,
        })
    }

    /// Run the tool and parse its payload as one JSON document.
    ///
    /// Non-zero exit yields `InvokeError::Exit` carrying stderr; a zero exit
    /// with an unparsable payload yields `InvokeError::PayloadParse`.
    pub async fn invoke_json(
        &self,
        args: &[String],
        progress: Option<&JobProgress>,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.run(args, progress, cancel).await?.into_json()
    }
}

/// Accumulates stdout according to the framing.
enum PayloadSink {
    Lines(LineProtocolReader),
    Raw(Vec<u8>),
}

impl PayloadSink {
    fn new(framing: Framing) -> Self {
        match framing {
            Framing::Lines(policy) => PayloadSink::Lines(LineProtocolReader::new(policy)),
            Framing::Raw => PayloadSink::Raw(Vec::new()),
        }
    }

    fn feed(&mut self, chunk: &[u8], progress: Option<&JobProgress>) {
        match self {
            PayloadSink::Lines(reader) => forward(reader.feed(chunk), progress),
            PayloadSink::Raw(buf) => buf.extend_from_slice(chunk),
        }
    }

    fn finish(&mut self, progress: Option<&JobProgress>) {
        if let PayloadSink::Lines(reader) = self {
            forward(reader.finish(), progress);
        }
    }

    fn into_payload(self) -> String {
        match self {
            PayloadSink::Lines(reader) => reader.into_payload(),
            PayloadSink::Raw(buf) => String::from_utf8_lossy(&buf).into_owned(),
        }
    }
}

fn forward(percents: Vec<u8>, progress: Option<&JobProgress>) {
    let Some(progress) = progress else {
        return;
    };
    for percent in percents {
        progress.emit(percent);
    }
}

async fn pump_stdout(
    child: &mut Child,
    mut stdout: ChildStdout,
    sink: &mut PayloadSink,
    progress: Option<&JobProgress>,
) -> std::io::Result<ExitStatus> {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.feed(&buf[..n], progress);
    }
    sink.finish(progress);
    child.wait().await
}

/// Append everything read from `source` into `captured` until EOF.
async fn collect_into<R: AsyncRead + Unpin>(mut source: R, captured: Arc<Mutex<Vec<u8>>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => lock_captured(&captured).extend_from_slice(&buf[..n]),
            Err(e) => {
                debug!(error = %e, "stderr read failed");
                break;
            }
        }
    }
}

fn lock_captured(captured: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    captured.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn captured_text(captured: &Mutex<Vec<u8>>) -> String {
    String::from_utf8_lossy(&lock_captured(captured)).into_owned()
}

/// Resolves with `limit` once it has elapsed since `start`; never without one.
async fn expiry(start: Instant, limit: Option<Duration>) -> Duration {
    match limit {
        Some(limit) => {
            tokio::time::sleep_until(start + limit).await;
            limit
        }
        None => std::future::pending().await,
    }
}

async fn interrupt(
    program: &str,
    child: &mut Child,
    stderr_task: &JoinHandle<()>,
    why: Interrupt,
) -> InvokeError {
    let err = match why {
        Interrupt::Cancelled => {
            warn!(program = %program, "cancelled, killing process");
            InvokeError::Cancelled
        }
        Interrupt::TimedOut(after) => {
            warn!(program = %program, timeout_secs = after.as_secs(), "timed out, killing process");
            InvokeError::Timeout { after }
        }
    };
    kill_quietly(child).await;
    stderr_task.abort();
    err
}

async fn kill_quietly(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed, process already gone");
    }
}
