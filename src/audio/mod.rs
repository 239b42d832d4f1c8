//! Audio payloads exchanged with the pipeline.
//!
//! The pipeline treats audio as opaque encoded files. [`AudioBlob`] holds the
//! bytes and an [`AudioRole`] tag; base64 transcoding happens only here, at
//! the outer boundary, never inside the stage adapters.
//!
//! ```
//! use voice_cover::audio::{AudioBlob, AudioRole};
//!
//! let song = AudioBlob::new(AudioRole::Song, vec![0u8; 44]).with_extension("mp3");
//! assert_eq!(song.extension(), "mp3");
//! ```

pub mod blob;

pub use blob::{AudioBlob, AudioRole, Base64Error, DEFAULT_EXTENSION};
