//! Voice-cover pipeline orchestrator.
//!
//! Turns a song and a short reference recording of a voice into a cover of
//! the song sung in that voice, by driving four external tools:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`audio`] | `AudioBlob`: opaque audio bytes with a role and format hint |
//! | [`config`] | `settings.toml` and platform paths |
//! | [`workspace`] | per-run scratch directory, removed when the run ends |
//! | [`process`] | running tools with timeouts, cancellation, marker parsing |
//! | [`stages`] | separator, trainer, converter and mixer adapters |
//! | [`pipeline`] | the orchestrator and its progress events |

pub mod audio;
pub mod config;
pub mod pipeline;
pub mod process;
pub mod stages;
pub mod workspace;
