//! Stage adapters.
//!
//! Each adapter turns typed inputs into one invocation of an external tool
//! and turns the result back into typed outputs:
//!
//! 1. write input blobs into the run's [`RunWorkspace`](crate::workspace::RunWorkspace),
//! 2. expand the configured argument template,
//! 3. run the tool through a [`ProcessRunner`](crate::process::ProcessRunner),
//! 4. locate the output (stdout marker first, naming convention second),
//! 5. read it back as an [`AudioBlob`](crate::audio::AudioBlob).
//!
//! Every failure comes back as a [`StageError`] attributed to the stage.

pub mod converter;
pub mod discovery;
pub mod invoke;
pub mod mixer;
pub mod outcome;
pub mod separator;
pub mod trainer;

pub use converter::Converter;
pub use mixer::Mixer;
pub use outcome::{FailureKind, StageError, StageId};
pub use separator::{SeparatedTracks, Separator};
pub use trainer::{Trainer, VoiceModel};
