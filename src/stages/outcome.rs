//! Stage identity and the classified failure every adapter returns.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::ProcessError;
use crate::workspace::WorkspaceError;

/// Number of trailing stderr lines kept in a diagnostic.
const STDERR_TAIL_LINES: usize = 40;

// ---------------------------------------------------------------------------
// StageId
// ---------------------------------------------------------------------------

/// The four pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Separator,
    Trainer,
    Converter,
    Mixer,
}

impl StageId {
    pub const ALL: [StageId; 4] = [
        StageId::Separator,
        StageId::Trainer,
        StageId::Converter,
        StageId::Mixer,
    ];

    /// Name of the settings section configuring this stage's tool.
    pub fn config_section(self) -> &'static str {
        match self {
            StageId::Separator => "separator",
            StageId::Trainer => "trainer",
            StageId::Converter => "converter",
            StageId::Mixer => "mixer",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_section())
    }
}

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The tool's executable is missing or not invocable.
    LaunchFailure,
    /// The tool ran and exited non-zero (or was killed by a signal).
    ExecutionFailure,
    /// The tool exceeded its time limit and was killed.
    Timeout,
    /// The tool exited 0 but no readable artifact was found.
    OutputNotFound,
    /// Scratch storage could not be allocated or written.
    WorkspaceError,
    /// The caller cancelled the run.
    Cancelled,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::LaunchFailure => "launch failure",
            FailureKind::ExecutionFailure => "execution failure",
            FailureKind::Timeout => "timeout",
            FailureKind::OutputNotFound => "output not found",
            FailureKind::WorkspaceError => "workspace error",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// StageError
// ---------------------------------------------------------------------------

/// A failure attributed to exactly one stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} stage failed ({kind}): {detail}")]
pub struct StageError {
    pub stage: StageId,
    pub kind: FailureKind,
    /// Exit code for execution failures, when the tool exited normally.
    pub exit_code: Option<i32>,
    /// Human-readable diagnostic.
    pub detail: String,
}

impl StageError {
    pub fn new(stage: StageId, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            exit_code: None,
            detail: detail.into(),
        }
    }

    /// Classify a runner failure for `stage`.
    pub fn from_process(stage: StageId, err: ProcessError) -> Self {
        match err {
            ProcessError::Launch { program, source } => Self::new(
                stage,
                FailureKind::LaunchFailure,
                format!(
                    "executable `{program}` could not be started ({source}); install it or set \
                     `{}.program` in settings.toml",
                    stage.config_section()
                ),
            ),
            ProcessError::Execution {
                program,
                exit_code,
                stderr,
                ..
            } => {
                let status = match exit_code {
                    Some(code) => format!("exited with code {code}"),
                    None => "was terminated by a signal".to_string(),
                };
                let tail = tail_lines(&stderr, STDERR_TAIL_LINES);
                let detail = if tail.is_empty() {
                    format!("`{program}` {status}")
                } else {
                    format!("`{program}` {status}:\n{tail}")
                };
                Self {
                    exit_code,
                    ..Self::new(stage, FailureKind::ExecutionFailure, detail)
                }
            }
            err @ ProcessError::Timeout { .. } => {
                Self::new(stage, FailureKind::Timeout, err.to_string())
            }
            err @ ProcessError::Cancelled { .. } => {
                Self::new(stage, FailureKind::Cancelled, err.to_string())
            }
            err @ ProcessError::Io { .. } => {
                Self::new(stage, FailureKind::ExecutionFailure, err.to_string())
            }
        }
    }

    pub fn workspace(stage: StageId, err: WorkspaceError) -> Self {
        Self::new(stage, FailureKind::WorkspaceError, err.to_string())
    }
}

/// The last `n` non-empty lines of `text`, trimmed.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    #[test]
    fn launch_failure_names_tool_and_setting() {
        let err = StageError::from_process(
            StageId::Separator,
            ProcessError::Launch {
                program: "demucs".into(),
                source: io::Error::new(io::ErrorKind::NotFound, "not found"),
            },
        );
        assert_eq!(err.kind, FailureKind::LaunchFailure);
        assert!(err.detail.contains("`demucs`"));
        assert!(err.detail.contains("separator.program"));
    }

    #[test]
    fn execution_failure_keeps_exit_code_and_stderr_tail() {
        let stderr: String = (0..100).map(|i| format!("line {i}\n")).collect();
        let err = StageError::from_process(
            StageId::Converter,
            ProcessError::Execution {
                program: "python".into(),
                exit_code: Some(2),
                stdout: String::new(),
                stderr,
            },
        );
        assert_eq!(err.kind, FailureKind::ExecutionFailure);
        assert_eq!(err.exit_code, Some(2));
        assert!(err.detail.contains("line 99"));
        assert!(!err.detail.contains("line 10\n"));
    }

    #[test]
    fn timeout_and_cancel_are_distinct_kinds() {
        let timeout = StageError::from_process(
            StageId::Trainer,
            ProcessError::Timeout {
                program: "python".into(),
                limit: Duration::from_secs(60),
            },
        );
        let cancelled = StageError::from_process(
            StageId::Trainer,
            ProcessError::Cancelled {
                program: "python".into(),
            },
        );
        assert_eq!(timeout.kind, FailureKind::Timeout);
        assert_eq!(cancelled.kind, FailureKind::Cancelled);
    }

    #[test]
    fn display_names_stage_and_kind() {
        let err = StageError::new(StageId::Mixer, FailureKind::OutputNotFound, "nothing at /x");
        assert_eq!(
            err.to_string(),
            "mixer stage failed (output not found): nothing at /x"
        );
    }
}
