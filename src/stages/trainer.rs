//! Reference voice → trained voice model.
//!
//! The trainer's artifact is a model identifier, not audio. The id is the
//! file stem of a `MODEL_PATH:` marker that points at a real file, or else
//! the name the trainer was asked to use.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::invoke::{run_tool, Placeholders};
use super::{StageError, StageId};
use crate::audio::AudioBlob;
use crate::config::TrainerConfig;
use crate::process::{MarkerKey, Markers, ProcessRunner};
use crate::workspace::RunWorkspace;

const STAGE: StageId = StageId::Trainer;

/// A trained model the converter can load.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoiceModel {
    id: String,
}

impl VoiceModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for VoiceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

pub struct Trainer {
    config: TrainerConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl Trainer {
    pub fn new(config: TrainerConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    /// Name passed to the trainer for this run.
    pub fn requested_name(&self, workspace: &RunWorkspace) -> String {
        match &self.config.model_name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => {
                let run = workspace.run_id().simple().to_string();
                format!("voice_{}", &run[..12])
            }
        }
    }

    pub async fn train(
        &self,
        workspace: &RunWorkspace,
        voice: &AudioBlob,
        cancel: &CancellationToken,
    ) -> Result<VoiceModel, StageError> {
        let input = workspace
            .materialize(voice)
            .await
            .map_err(|e| StageError::workspace(STAGE, e))?;
        let output_dir = workspace
            .allocate_dir("training")
            .map_err(|e| StageError::workspace(STAGE, e))?;
        let requested = self.requested_name(workspace);

        let tool = self.config.tool();
        let args = Placeholders::new()
            .with("input", &input)
            .with("model_name", &requested)
            .with("output_dir", &output_dir)
            .expand(&tool.args);

        let output = run_tool(STAGE, self.runner.as_ref(), &tool, args, cancel).await?;
        let markers = Markers::parse(&output.stdout);

        let reported = match markers.get(MarkerKey::ModelPath) {
            Some(path) => model_id_from(path, tool.current_dir.as_deref()).await,
            None => None,
        };
        let id = reported.unwrap_or(requested);
        log::info!("{STAGE}: model `{id}` ready");
        Ok(VoiceModel::new(id))
    }
}

/// File stem of `path`, if it names a readable regular file.
async fn model_id_from(path: &Path, base_dir: Option<&Path>) -> Option<String> {
    let resolved = match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    };
    let is_file = tokio::fs::metadata(&resolved)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        log::warn!(
            "{STAGE}: reported model {} is not a readable file; using the requested name",
            resolved.display()
        );
        return None;
    }
    resolved
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}
