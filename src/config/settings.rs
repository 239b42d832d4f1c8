//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`: a settings file only needs the keys
//! it overrides.
//!
//! ```toml
//! [workspace]
//! scratch_root = "/var/tmp/voice-cover"
//!
//! [pipeline]
//! parallel_training = true
//!
//! [separator]
//! program = "/opt/demucs/bin/demucs"
//! timeout_secs = 900
//!
//! [mixer]
//! vocal_gain_db = -3.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ToolConfig
// ---------------------------------------------------------------------------

/// How to invoke one external tool, as handed to a stage adapter.
///
/// `args` is a template: `{name}` tokens are replaced with run-specific
/// values by the adapter (see each stage config for the available
/// placeholders). Built from the flat `program` / `args` / `timeout_secs` /
/// `current_dir` keys of a stage section via its `tool()` method.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    /// Executable name (looked up on `PATH`) or absolute path.
    pub program: String,
    /// Argument template.
    pub args: Vec<String>,
    /// Kill the tool after this many seconds. `None` waits forever.
    pub timeout_secs: Option<u64>,
    /// Working directory for the tool; `None` inherits ours.
    pub current_dir: Option<PathBuf>,
}

impl ToolConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Owned argument template from string literals.
pub(crate) fn template(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

// ---------------------------------------------------------------------------
// SeparatorConfig
// ---------------------------------------------------------------------------

/// Source separation (Demucs by default).
///
/// Placeholders: `{input}`, `{output_dir}`, `{model}`.
///
/// Without `VOCALS_PATH:` / `INSTRUMENTAL_PATH:` markers the outputs are
/// expected at `<output_dir>/<model>/<input stem>/<vocals_file>` and
/// `…/<instrumental_file>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub current_dir: Option<PathBuf>,
    /// Model name; also the namespace directory Demucs writes into.
    pub model: String,
    pub vocals_file: String,
    pub instrumental_file: String,
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            program: "demucs".into(),
            args: template(&["--two-stems=vocals", "-n", "{model}", "-o", "{output_dir}", "{input}"]),
            timeout_secs: Some(30 * 60),
            current_dir: None,
            model: "htdemucs".into(),
            vocals_file: "vocals.wav".into(),
            instrumental_file: "no_vocals.wav".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TrainerConfig
// ---------------------------------------------------------------------------

/// Voice model training (so-vits-svc wrapper script by default).
///
/// Placeholders: `{input}`, `{model_name}`, `{output_dir}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub current_dir: Option<PathBuf>,
    /// Requested model name. `None` derives one from the run id so
    /// concurrent runs never train into the same name.
    pub model_name: Option<String>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            program: "python".into(),
            args: template(&["scripts/train_model.py", "{input}", "-n", "{model_name}"]),
            timeout_secs: Some(4 * 60 * 60),
            current_dir: None,
            model_name: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ConverterConfig
// ---------------------------------------------------------------------------

/// Voice conversion (so-vits-svc inference wrapper by default).
///
/// Placeholders: `{input}`, `{model_id}`, `{model_path}`, `{config_path}`,
/// `{output}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub current_dir: Option<PathBuf>,
    /// Template turning a model id into the checkpoint path (`{model_id}`).
    pub model_path: String,
    /// Model configuration file passed to the converter.
    pub config_path: PathBuf,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "python".into(),
            args: template(&[
                "scripts/convert_voice.py",
                "{input}",
                "-m",
                "{model_path}",
                "-c",
                "{config_path}",
                "-o",
                "{output}",
            ]),
            timeout_secs: Some(30 * 60),
            current_dir: None,
            model_path: "/content/so-vits-svc/logs/44k/{model_id}.pth".into(),
            config_path: PathBuf::from("/content/so-vits-svc/configs/config.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// MixerConfig
// ---------------------------------------------------------------------------

/// Final mixdown (`merge_audio.py` by default).
///
/// Placeholders: `{vocals}`, `{instrumental}`, `{vocal_gain}`,
/// `{instrumental_gain}`, `{output}`.
///
/// `merge_audio.py` only accepts whole dB, so gains are rounded to the
/// nearest integer unless `round_gains` is turned off for a mixer that takes
/// fractional values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub current_dir: Option<PathBuf>,
    /// Gain applied to the converted vocals, in dB (negative = quieter).
    pub vocal_gain_db: f32,
    /// Gain applied to the instrumental, in dB.
    pub instrumental_gain_db: f32,
    /// Pass gains as whole dB.
    pub round_gains: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            program: "python".into(),
            args: template(&[
                "scripts/merge_audio.py",
                "{vocals}",
                "{instrumental}",
                "-o",
                "{output}",
                "-vv",
                "{vocal_gain}",
                "-iv",
                "{instrumental_gain}",
            ]),
            timeout_secs: Some(5 * 60),
            current_dir: None,
            vocal_gain_db: -2.0,
            instrumental_gain_db: -1.0,
            round_gains: true,
        }
    }
}

// Every stage section carries the same four tool keys.
macro_rules! impl_tool_accessor {
    ($($section:ty),+) => {
        $(
            impl $section {
                /// The tool invocation described by this section.
                pub fn tool(&self) -> ToolConfig {
                    ToolConfig {
                        program: self.program.clone(),
                        args: self.args.clone(),
                        timeout_secs: self.timeout_secs,
                        current_dir: self.current_dir.clone(),
                    }
                }
            }
        )+
    };
}

impl_tool_accessor!(SeparatorConfig, TrainerConfig, ConverterConfig, MixerConfig);

// ---------------------------------------------------------------------------
// WorkspaceConfig / PipelineConfig
// ---------------------------------------------------------------------------

/// Where per-run scratch directories are created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// `None` uses [`AppPaths::scratch_dir`].
    pub scratch_root: Option<PathBuf>,
}

impl WorkspaceConfig {
    pub fn resolved_scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| AppPaths::new().scratch_dir)
    }
}

/// Orchestration switches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Train the voice model while the song is being separated.
    ///
    /// Off by default: a failing separator then never starts the (much
    /// longer) training job.
    pub parallel_training: bool,
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_cover::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub workspace: WorkspaceConfig,
    pub pipeline: PipelineConfig,
    pub separator: SeparatorConfig,
    pub trainer: TrainerConfig,
    pub converter: ConverterConfig,
    pub mixer: MixerConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
