//! Per-run scratch storage.
//!
//! Every pipeline run owns one [`RunWorkspace`] rooted at
//! `<scratch_root>/run-<uuid>`. Stage adapters allocate input files and tool
//! output directories through it; the orchestrator releases it when the run
//! ends, whatever the outcome.
//!
//! ```text
//! <scratch_root>/
//! └── run-6f1c…/
//!     ├── 00-song.mp3
//!     ├── 01-separated/htdemucs/00-song/{vocals,no_vocals}.wav
//!     ├── 02-reference-voice.m4a
//!     ├── 03-converted-vocals.wav
//!     └── 04-final-mix.wav
//! ```

pub mod store;

pub use store::{ReleaseReport, RunWorkspace, WorkspaceError};
