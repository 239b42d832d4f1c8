//! Pipeline orchestrator module.
//!
//! This module sequences the four stage adapters for one run and reports
//! progress on a side channel.
//!
//! # Architecture
//!
//! ```text
//! song, reference voice (AudioBlob)
//!        │
//!        ▼
//! PipelineOrchestrator::run()        ← one tokio task per run
//!        │
//!        ├─ Separator  → vocals + instrumental
//!        ├─ Trainer    → VoiceModel          (optionally concurrent with Separator)
//!        ├─ Converter  → converted vocals
//!        └─ Mixer      → final mix
//!
//! ProgressSink ◀── ProgressEvent { run_id, state, percent } on every transition
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use voice_cover::audio::{AudioBlob, AudioRole};
//! use voice_cover::config::AppConfig;
//! use voice_cover::pipeline::{PipelineOrchestrator, ProgressEvent};
//! use voice_cover::process::SystemRunner;
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = PipelineOrchestrator::new(AppConfig::load().unwrap(), Arc::new(SystemRunner));
//!     let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = progress_rx.recv().await {
//!             println!("{}%", event.percent);
//!         }
//!     });
//!
//!     let song = AudioBlob::new(AudioRole::Song, std::fs::read("song.wav").unwrap());
//!     let voice = AudioBlob::new(AudioRole::ReferenceVoice, std::fs::read("me.wav").unwrap());
//!     let mix = orchestrator.run(&song, &voice, Some(&progress_tx)).await.unwrap();
//!     std::fs::write("cover.wav", mix.bytes()).unwrap();
//! }
//! ```

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{PipelineError, PipelineOrchestrator};
pub use state::{LogProgress, PipelineState, ProgressEvent, ProgressSink};
