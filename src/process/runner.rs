//! Spawn-and-collect primitive shared by every stage adapter.
//!
//! [`ProcessRunner`] is the seam between the adapters and the operating
//! system. [`SystemRunner`] is the production implementation on top of
//! `tokio::process`; [`ScriptedRunner`] (available under `#[cfg(test)]`)
//! replays canned results so the adapters and the orchestrator can be tested
//! without the real separation / training tools installed.
//!
//! The runner classifies *how* a process ended (could not start, non-zero
//! exit, timed out, cancelled) but never looks at what it printed; turning
//! output into artifacts is the adapters' job.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to keep draining stdout/stderr after the process exits.
///
/// A grandchild that inherited the pipes can keep them open forever.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// ToolCommand / ProcessOutput
// ---------------------------------------------------------------------------

/// One invocation of an external tool.
#[derive(Debug, Clone, Default)]
pub struct ToolCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Bytes written to the child's stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
    pub current_dir: Option<PathBuf>,
    /// Maximum wall-clock time before the child is killed.
    pub timeout: Option<Duration>,
}

impl ToolCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    /// Short name for logs: the program's file name.
    pub fn display_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .unwrap_or_else(|| OsStr::new(&self.program))
            .to_string_lossy()
            .into_owned()
    }
}

/// Everything a successful process produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

// ---------------------------------------------------------------------------
// ProcessError
// ---------------------------------------------------------------------------

/// How an external process failed.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The executable is missing or not invocable.
    #[error("cannot launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process ran and reported failure.
    #[error("`{program}` {}", exit_label(.exit_code))]
    Execution {
        program: String,
        /// `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The process exceeded its time limit and was killed.
    #[error("`{program}` exceeded its time limit of {limit:?} and was killed")]
    Timeout { program: String, limit: Duration },

    /// The caller cancelled the run; the process was killed.
    #[error("`{program}` was cancelled")]
    Cancelled { program: String },

    /// Waiting on the child failed.
    #[error("I/O error while waiting for `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

// ---------------------------------------------------------------------------
// ProcessRunner trait
// ---------------------------------------------------------------------------

/// Runs one external tool to completion.
///
/// Implementations must be `Send + Sync` so a single runner can be shared by
/// all adapters behind an `Arc<dyn ProcessRunner>`.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `command`, resolving when the process exits, times out, or
    /// `cancel` fires. A zero exit is `Ok`; everything else is classified
    /// into a [`ProcessError`].
    async fn run(
        &self,
        command: ToolCommand,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError>;
}

// Compile-time assertion: Box<dyn ProcessRunner> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn ProcessRunner>) {}
};

// ---------------------------------------------------------------------------
// SystemRunner
// ---------------------------------------------------------------------------

/// Runs tools as real child processes via `tokio::process`.
///
/// On unix every tool gets its own process group, and a timeout, a
/// cancellation or a dropped run kills the whole group, so helpers the tool
/// started itself (`subprocess.run` and the like) die with it. Any members
/// still alive after a normal exit are killed as well. `kill_on_drop(true)`
/// stays on as a fallback for the direct child.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

enum Waited {
    Exited(io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(
        &self,
        command: ToolCommand,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        let program = command.display_name();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        log::debug!("process: spawning {:?} {:?}", command.program, command.args);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Launch {
            program: program.clone(),
            source,
        })?;
        let mut group = ProcessGroup::of(&child);

        if let (Some(input), Some(mut pipe)) = (command.stdin, child.stdin.take()) {
            let tool = program.clone();
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    if e.kind() != io::ErrorKind::BrokenPipe {
                        log::warn!("process: writing stdin of {tool} failed: {e}");
                    }
                }
                // `pipe` dropped here: the child sees EOF.
            });
        }

        let mut stdout = Capture::spawn(child.stdout.take(), &program, "stdout");
        let mut stderr = Capture::spawn(child.stderr.take(), &program, "stderr");

        let limit = command.timeout;
        let deadline = async move {
            match limit {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = cancel.cancelled() => Waited::Cancelled,
            limit = deadline => Waited::TimedOut(limit),
        };

        match waited {
            Waited::Exited(Ok(status)) => {
                group.kill(&program);
                let stdout = stdout.drain(OUTPUT_DRAIN_GRACE, &program).await;
                let stderr = stderr.drain(OUTPUT_DRAIN_GRACE, &program).await;
                if status.success() {
                    log::debug!("process: {program} exited successfully");
                    Ok(ProcessOutput {
                        exit_code: status.code().unwrap_or(0),
                        stdout,
                        stderr,
                    })
                } else {
                    log::debug!("process: {program} failed ({status})");
                    Err(ProcessError::Execution {
                        program,
                        exit_code: status.code(),
                        stdout,
                        stderr,
                    })
                }
            }
            Waited::Exited(Err(source)) => {
                group.kill(&program);
                stdout.abort();
                stderr.abort();
                Err(ProcessError::Io { program, source })
            }
            Waited::Cancelled => {
                log::info!("process: cancelling {program}");
                terminate(&mut child, &mut group, &program).await;
                stdout.abort();
                stderr.abort();
                Err(ProcessError::Cancelled { program })
            }
            Waited::TimedOut(limit) => {
                log::warn!("process: {program} exceeded {limit:?}, killing");
                terminate(&mut child, &mut group, &program).await;
                stdout.abort();
                stderr.abort();
                Err(ProcessError::Timeout { program, limit })
            }
        }
    }
}

/// The process group a tool was spawned into. Dropping it kills the group.
struct ProcessGroup {
    #[cfg(unix)]
    pgid: Option<libc::pid_t>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        #[cfg(unix)]
        {
            Self {
                pgid: child.id().and_then(|id| libc::pid_t::try_from(id).ok()),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child;
            Self {}
        }
    }

    /// SIGKILL every member. Only the first call signals; the id is
    /// forgotten afterwards so it cannot hit a recycled group.
    fn kill(&mut self, program: &str) {
        if let Err(e) = self.signal() {
            log::warn!("process: failed to kill process group of {program}: {e}");
        }
    }

    #[cfg(unix)]
    fn signal(&mut self) -> io::Result<()> {
        let Some(pgid) = self.pgid.take() else {
            return Ok(());
        };
        // SAFETY: killpg only sends a signal to the group created at spawn.
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            // Nobody left in the group.
            Some(libc::ESRCH) => Ok(()),
            _ => Err(err),
        }
    }

    #[cfg(not(unix))]
    fn signal(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        let _ = self.signal();
    }
}

/// Lines read from one of the child's pipes.
///
/// Text lands in a shared buffer as it arrives, so whatever was read before
/// an abort is still there afterwards.
struct Capture {
    buffer: Arc<Mutex<String>>,
    task: Option<JoinHandle<()>>,
}

impl Capture {
    fn spawn<R>(stream: Option<R>, tool: &str, channel: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(String::new()));
        let task = stream.map(|s| {
            tokio::spawn(collect_stream(s, tool.to_string(), channel, buffer.clone()))
        });
        Self { buffer, task }
    }

    /// Wait up to `grace` for EOF, then return everything read so far.
    async fn drain(&mut self, grace: Duration, program: &str) -> String {
        if let Some(handle) = self.task.as_mut() {
            match tokio::time::timeout(grace, &mut *handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("process: output reader for {program} failed: {e}"),
                Err(_) => {
                    log::warn!(
                        "process: output of {program} still open after exit, keeping what was read"
                    );
                    handle.abort();
                }
            }
        }
        self.task = None;
        self.take()
    }

    fn abort(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }

    fn take(&self) -> String {
        let mut text = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *text)
    }
}

/// Read a pipe to EOF, logging each line as it arrives.
async fn collect_stream<R>(
    stream: R,
    tool: String,
    channel: &'static str,
    sink: Arc<Mutex<String>>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                log::debug!("[{tool} {channel}] {}", text.trim_end());
                sink.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push_str(&text);
            }
            Err(e) => {
                log::warn!("process: reading {channel} of {tool} failed: {e}");
                break;
            }
        }
    }
}

async fn terminate(child: &mut Child, group: &mut ProcessGroup, program: &str) {
    group.kill(program);
    if let Err(e) = child.kill().await {
        log::warn!("process: failed to kill {program}: {e}");
    }
}

// ---------------------------------------------------------------------------
// ScriptedRunner (test double)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use scripted::ScriptedRunner;

#[cfg(test)]
mod scripted {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    type Script = Box<dyn Fn(&ToolCommand) -> Result<ProcessOutput, ProcessError> + Send + Sync>;

    /// Replays a canned reaction per program name and records every call.
    ///
    /// Unknown programs fail with [`ProcessError::Launch`], exactly like a
    /// missing executable.
    #[derive(Default)]
    pub struct ScriptedRunner {
        scripts: HashMap<String, Script>,
        calls: Mutex<Vec<ToolCommand>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// React to invocations of `program` with `script`.
        pub fn on<F>(mut self, program: &str, script: F) -> Self
        where
            F: Fn(&ToolCommand) -> Result<ProcessOutput, ProcessError> + Send + Sync + 'static,
        {
            self.scripts.insert(program.to_string(), Box::new(script));
            self
        }

        /// Program names in invocation order.
        pub fn invoked(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.program.to_string_lossy().into_owned())
                .collect()
        }

        pub fn commands(&self) -> Vec<ToolCommand> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(
            &self,
            command: ToolCommand,
            cancel: &CancellationToken,
        ) -> Result<ProcessOutput, ProcessError> {
            self.calls.lock().unwrap().push(command.clone());
            let program = command.program.to_string_lossy().into_owned();

            if cancel.is_cancelled() {
                return Err(ProcessError::Cancelled { program });
            }
            match self.scripts.get(&program) {
                Some(script) => script(&command),
                None => Err(ProcessError::Launch {
                    program,
                    source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
                }),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
