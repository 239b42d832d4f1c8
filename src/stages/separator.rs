//! Song → vocal + instrumental.

use std::ffi::OsStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::discovery::read_output;
use super::invoke::{run_tool, Placeholders};
use super::{StageError, StageId};
use crate::audio::{AudioBlob, AudioRole};
use crate::config::SeparatorConfig;
use crate::process::{MarkerKey, Markers, ProcessRunner};
use crate::workspace::RunWorkspace;

const STAGE: StageId = StageId::Separator;

/// The two stems produced from a song.
#[derive(Debug, Clone)]
pub struct SeparatedTracks {
    pub vocals: AudioBlob,
    pub instrumental: AudioBlob,
}

pub struct Separator {
    config: SeparatorConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl Separator {
    pub fn new(config: SeparatorConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    pub async fn separate(
        &self,
        workspace: &RunWorkspace,
        song: &AudioBlob,
        cancel: &CancellationToken,
    ) -> Result<SeparatedTracks, StageError> {
        let input = workspace
            .materialize(song)
            .await
            .map_err(|e| StageError::workspace(STAGE, e))?;
        let output_dir = workspace
            .allocate_dir("separated")
            .map_err(|e| StageError::workspace(STAGE, e))?;

        let tool = self.config.tool();
        let args = Placeholders::new()
            .with("input", &input)
            .with("output_dir", &output_dir)
            .with("model", &self.config.model)
            .expand(&tool.args);

        let output = run_tool(STAGE, self.runner.as_ref(), &tool, args, cancel).await?;
        let markers = Markers::parse(&output.stdout);

        // Demucs layout: <output_dir>/<model>/<input stem>/<stem file>
        let track_dir = output_dir
            .join(&self.config.model)
            .join(input.file_stem().unwrap_or(OsStr::new("input")));
        let base_dir = tool.current_dir.as_deref();

        let vocals = read_output(
            STAGE,
            AudioRole::Vocal,
            markers.get(MarkerKey::VocalsPath).map(|p| p.as_path()),
            base_dir,
            &track_dir.join(&self.config.vocals_file),
        )
        .await?;
        let instrumental = read_output(
            STAGE,
            AudioRole::Instrumental,
            markers.get(MarkerKey::InstrumentalPath).map(|p| p.as_path()),
            base_dir,
            &track_dir.join(&self.config.instrumental_file),
        )
        .await?;

        Ok(SeparatedTracks {
            vocals,
            instrumental,
        })
    }
}
