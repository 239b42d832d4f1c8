//! Isolated vocals + voice model → converted vocals.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::discovery::read_output;
use super::invoke::{run_tool, Placeholders};
use super::{StageError, StageId, VoiceModel};
use crate::audio::{AudioBlob, AudioRole, DEFAULT_EXTENSION};
use crate::config::ConverterConfig;
use crate::process::{MarkerKey, Markers, ProcessRunner};
use crate::workspace::RunWorkspace;

const STAGE: StageId = StageId::Converter;

pub struct Converter {
    config: ConverterConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl Converter {
    pub fn new(config: ConverterConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    /// Checkpoint path handed to the converter for `model`.
    pub fn model_path(&self, model: &VoiceModel) -> String {
        self.config.model_path.replace("{model_id}", model.id())
    }

    pub async fn convert(
        &self,
        workspace: &RunWorkspace,
        vocals: &AudioBlob,
        model: &VoiceModel,
        cancel: &CancellationToken,
    ) -> Result<AudioBlob, StageError> {
        let input = workspace
            .materialize(vocals)
            .await
            .map_err(|e| StageError::workspace(STAGE, e))?;
        let output = workspace
            .allocate_file(AudioRole::ConvertedVocal, DEFAULT_EXTENSION)
            .map_err(|e| StageError::workspace(STAGE, e))?;

        let tool = self.config.tool();
        let args = Placeholders::new()
            .with("input", &input)
            .with("model_id", model.id())
            .with("model_path", self.model_path(model))
            .with("config_path", &self.config.config_path)
            .with("output", &output)
            .expand(&tool.args);

        let result = run_tool(STAGE, self.runner.as_ref(), &tool, args, cancel).await?;
        let markers = Markers::parse(&result.stdout);

        read_output(
            STAGE,
            AudioRole::ConvertedVocal,
            markers.get(MarkerKey::OutputFile).map(|p| p.as_path()),
            tool.current_dir.as_deref(),
            &output,
        )
        .await
    }
}
