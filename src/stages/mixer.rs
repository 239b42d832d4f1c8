//! Converted vocals + instrumental → final mix.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::discovery::read_output;
use super::invoke::{run_tool, Placeholders};
use super::{StageError, StageId};
use crate::audio::{AudioBlob, AudioRole, DEFAULT_EXTENSION};
use crate::config::MixerConfig;
use crate::process::{MarkerKey, Markers, ProcessRunner};
use crate::workspace::RunWorkspace;

const STAGE: StageId = StageId::Mixer;

pub struct Mixer {
    config: MixerConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl Mixer {
    pub fn new(config: MixerConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    pub async fn mix(
        &self,
        workspace: &RunWorkspace,
        vocals: &AudioBlob,
        instrumental: &AudioBlob,
        cancel: &CancellationToken,
    ) -> Result<AudioBlob, StageError> {
        let ws_err = |e| StageError::workspace(STAGE, e);
        let vocals_path = workspace.materialize(vocals).await.map_err(ws_err)?;
        let instrumental_path = workspace.materialize(instrumental).await.map_err(ws_err)?;
        let output = workspace
            .allocate_file(AudioRole::FinalMix, DEFAULT_EXTENSION)
            .map_err(ws_err)?;

        let tool = self.config.tool();
        let args = Placeholders::new()
            .with("vocals", &vocals_path)
            .with("instrumental", &instrumental_path)
            .with("vocal_gain", self.gain("vocal", self.config.vocal_gain_db))
            .with(
                "instrumental_gain",
                self.gain("instrumental", self.config.instrumental_gain_db),
            )
            .with("output", &output)
            .expand(&tool.args);

        let result = run_tool(STAGE, self.runner.as_ref(), &tool, args, cancel).await?;
        let markers = Markers::parse(&result.stdout);

        read_output(
            STAGE,
            AudioRole::FinalMix,
            markers.get(MarkerKey::OutputFile).map(|p| p.as_path()),
            tool.current_dir.as_deref(),
            &output,
        )
        .await
    }

    /// Gain as passed on the command line: whole dB unless `round_gains` is off.
    fn gain(&self, which: &str, db: f32) -> String {
        if !self.config.round_gains || db.fract() == 0.0 {
            return db.to_string();
        }
        let rounded = db.round();
        log::warn!("mixer: {which} gain {db} dB rounded to {rounded} dB");
        rounded.to_string()
    }
}
