//! Parser for the `KEY:value` marker lines external tools print on stdout.
//!
//! Tools mix these lines into free-form progress logs, e.g.
//!
//! ```text
//! Separating vocals from /tmp/run-…/00-song.wav...
//! VOCALS_PATH:/tmp/run-…/01-separated/htdemucs/00-song/vocals.wav
//! INSTRUMENTAL_PATH:/tmp/run-…/01-separated/htdemucs/00-song/no_vocals.wav
//! ```
//!
//! Only the fixed set of [`MarkerKey`]s is recognised; any other line is
//! ignored. A marker only says where a tool *claims* to have written
//! something; callers must still check that the path is readable.

use std::path::PathBuf;

/// Marker keys understood by the stage adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKey {
    OutputFile,
    VocalsPath,
    InstrumentalPath,
    ModelPath,
}

impl MarkerKey {
    pub const ALL: [MarkerKey; 4] = [
        MarkerKey::OutputFile,
        MarkerKey::VocalsPath,
        MarkerKey::InstrumentalPath,
        MarkerKey::ModelPath,
    ];

    /// The literal prefix, without the colon.
    pub fn as_str(self) -> &'static str {
        match self {
            MarkerKey::OutputFile => "OUTPUT_FILE",
            MarkerKey::VocalsPath => "VOCALS_PATH",
            MarkerKey::InstrumentalPath => "INSTRUMENTAL_PATH",
            MarkerKey::ModelPath => "MODEL_PATH",
        }
    }
}

/// The first value seen for each recognised key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Markers {
    output_file: Option<PathBuf>,
    vocals_path: Option<PathBuf>,
    instrumental_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
}

impl Markers {
    /// Scan `stdout` line by line.
    pub fn parse(stdout: &str) -> Self {
        let mut markers = Markers::default();
        for line in stdout.lines() {
            if let Some((key, value)) = parse_line(line) {
                let slot = markers.slot_mut(key);
                if slot.is_none() {
                    *slot = Some(PathBuf::from(value));
                }
            }
        }
        markers
    }

    pub fn get(&self, key: MarkerKey) -> Option<&PathBuf> {
        match key {
            MarkerKey::OutputFile => self.output_file.as_ref(),
            MarkerKey::VocalsPath => self.vocals_path.as_ref(),
            MarkerKey::InstrumentalPath => self.instrumental_path.as_ref(),
            MarkerKey::ModelPath => self.model_path.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        MarkerKey::ALL.iter().all(|k| self.get(*k).is_none())
    }

    fn slot_mut(&mut self, key: MarkerKey) -> &mut Option<PathBuf> {
        match key {
            MarkerKey::OutputFile => &mut self.output_file,
            MarkerKey::VocalsPath => &mut self.vocals_path,
            MarkerKey::InstrumentalPath => &mut self.instrumental_path,
            MarkerKey::ModelPath => &mut self.model_path,
        }
    }
}

/// Parse one line; `None` for anything that is not a non-empty known marker.
fn parse_line(line: &str) -> Option<(MarkerKey, &str)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (prefix, rest) = line.split_once(':')?;
    let key = MarkerKey::ALL.into_iter().find(|k| k.as_str() == prefix)?;

    let value = strip_quotes(rest.trim());
    if value.is_empty() {
        return None;
    }
    Some((key, value))
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .trim()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
