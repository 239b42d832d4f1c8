//! Immutable audio payloads passed between pipeline stages.
//!
//! Audio never travels through the pipeline as decoded samples: every stage
//! is an external tool that reads and writes files, so an [`AudioBlob`] is
//! just the encoded bytes plus the role the payload plays in the run and the
//! file extension it should be written with.

use std::fmt;
use std::path::Path;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// AudioRole
// ---------------------------------------------------------------------------

/// The semantic role of an [`AudioBlob`] within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioRole {
    /// The input song (vocals + accompaniment).
    Song,
    /// The recording of the target voice used for training.
    ReferenceVoice,
    /// Isolated vocals produced by the separator.
    Vocal,
    /// Accompaniment produced by the separator.
    Instrumental,
    /// Vocals re-sung in the target voice.
    ConvertedVocal,
    /// The final mix returned to the caller.
    FinalMix,
}

impl AudioRole {
    /// Short lowercase name used to build scratch file names.
    pub fn slug(self) -> &'static str {
        match self {
            AudioRole::Song => "song",
            AudioRole::ReferenceVoice => "reference-voice",
            AudioRole::Vocal => "vocals",
            AudioRole::Instrumental => "instrumental",
            AudioRole::ConvertedVocal => "converted-vocals",
            AudioRole::FinalMix => "final-mix",
        }
    }
}

impl fmt::Display for AudioRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

// ---------------------------------------------------------------------------
// AudioBlob
// ---------------------------------------------------------------------------

/// Extension used when a blob carries no better hint.
pub const DEFAULT_EXTENSION: &str = "wav";

/// Error decoding a base64 payload at the crate boundary.
#[derive(Debug, Error)]
#[error("invalid base64 audio payload for {role}: {source}")]
pub struct Base64Error {
    pub role: AudioRole,
    #[source]
    pub source: base64::DecodeError,
}

/// An encoded audio file held in memory.
///
/// Blobs are immutable once built; stages consume them by reference and
/// produce new blobs rather than editing existing ones.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioBlob {
    role: AudioRole,
    extension: String,
    bytes: Vec<u8>,
}

impl AudioBlob {
    /// Wrap `bytes` as a blob with the default `wav` extension.
    pub fn new(role: AudioRole, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            role,
            extension: DEFAULT_EXTENSION.to_string(),
            bytes: bytes.into(),
        }
    }

    /// Replace the extension hint (a leading `.` is ignored; empty keeps the default).
    pub fn with_extension(mut self, extension: &str) -> Self {
        let trimmed = extension.trim_start_matches('.');
        if !trimmed.is_empty() {
            self.extension = trimmed.to_ascii_lowercase();
        }
        self
    }

    /// Read a blob from disk, taking the extension hint from the file name.
    pub async fn read_from(role: AudioRole, path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let blob = Self::new(role, bytes);
        Ok(match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => blob.with_extension(ext),
            None => blob,
        })
    }

    /// Decode a base64 payload received from a caller.
    pub fn from_base64(role: AudioRole, encoded: &str) -> Result<Self, Base64Error> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|source| Base64Error { role, source })?;
        Ok(Self::new(role, bytes))
    }

    /// Encode the payload for callers that exchange audio as text.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn role(&self) -> AudioRole {
        self.role
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the blob and return the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// Payloads are tens of megabytes; never dump them into logs.
impl fmt::Debug for AudioBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBlob")
            .field("role", &self.role)
            .field("extension", &self.extension)
            .field("len", &self.bytes.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
