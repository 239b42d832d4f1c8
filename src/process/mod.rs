//! External process plumbing.
//!
//! * [`ProcessRunner`]: async trait every stage adapter calls to run a tool.
//! * [`SystemRunner`]: `tokio::process` implementation with timeouts,
//!   cancellation and kill-on-drop.
//! * [`Markers`]: parser for the `KEY:value` lines tools print to report
//!   where they wrote their output.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use voice_cover::process::{ProcessRunner, SystemRunner, ToolCommand};
//!
//! # async fn example() {
//! let cmd = ToolCommand::new("demucs").args(["--two-stems=vocals", "song.wav"]);
//! let output = SystemRunner.run(cmd, &CancellationToken::new()).await.unwrap();
//! println!("{}", output.stdout);
//! # }
//! ```

pub mod marker;
pub mod runner;

pub use marker::{MarkerKey, Markers};
pub use runner::{ProcessError, ProcessOutput, ProcessRunner, SystemRunner, ToolCommand};

// test-only re-export so the stage and pipeline tests can import the double
// as `crate::process::ScriptedRunner`.
#[cfg(test)]
pub use runner::ScriptedRunner;
