//! Pipeline orchestrator: drives one run through the four stages.
//!
//! # Run flow
//!
//! ```text
//! RunWorkspace::create
//!   └─▶ Separator::separate(song)                       [SeparatingVocals]
//!         └─▶ Trainer::train(voice)                     [TrainingModel]
//!               └─▶ Converter::convert(vocals, model)   [ConvertingVoice]
//!                     └─▶ Mixer::mix(converted, inst.)  [Mixing]
//!                           └─▶ release workspace       [Complete]
//!
//! any stage error ─▶ release workspace ─▶ [Failed { stage }] ─▶ PipelineError
//! ```
//!
//! With `pipeline.parallel_training` the separator and trainer run
//! concurrently; the first failure drops (and so kills) the other one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::AudioBlob;
use crate::config::AppConfig;
use crate::process::ProcessRunner;
use crate::stages::{
    Converter, FailureKind, Mixer, SeparatedTracks, Separator, StageError, StageId, Trainer,
    VoiceModel,
};
use crate::workspace::RunWorkspace;

use super::state::{PipelineState, ProgressEvent, ProgressSink};

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// The single failure a run reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} stage failed ({kind}): {detail}")]
pub struct PipelineError {
    pub run_id: Uuid,
    /// The stage the failure is attributed to.
    pub stage: StageId,
    pub kind: FailureKind,
    pub exit_code: Option<i32>,
    pub detail: String,
}

impl PipelineError {
    fn from_stage(run_id: Uuid, err: StageError) -> Self {
        Self {
            run_id,
            stage: err.stage,
            kind: err.kind,
            exit_code: err.exit_code,
            detail: err.detail,
        }
    }

    /// First line of the diagnostic, for one-line reports.
    pub fn summary(&self) -> String {
        let first = self.detail.lines().next().unwrap_or_default();
        format!("{} stage failed ({}): {first}", self.stage, self.kind)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Per-run progress reporter; keeps reported percentages non-decreasing.
struct Progress<'a> {
    run_id: Uuid,
    sink: Option<&'a dyn ProgressSink>,
    last_percent: AtomicU8,
}

impl<'a> Progress<'a> {
    fn new(run_id: Uuid, sink: Option<&'a dyn ProgressSink>) -> Self {
        Self {
            run_id,
            sink,
            last_percent: AtomicU8::new(0),
        }
    }

    fn enter(&self, state: PipelineState) {
        let last = self.last_percent.load(Ordering::SeqCst);
        let percent = state.percent().unwrap_or(last).max(last);
        self.last_percent.store(percent, Ordering::SeqCst);

        log::debug!("run {}: → {:?} ({percent}%)", self.run_id.simple(), state);
        if let Some(sink) = self.sink {
            sink.emit(ProgressEvent {
                run_id: self.run_id,
                state,
                percent,
            });
        }
    }
}

fn ensure_not_cancelled(next: StageId, cancel: &CancellationToken) -> Result<(), StageError> {
    if cancel.is_cancelled() {
        return Err(StageError::new(
            next,
            FailureKind::Cancelled,
            format!("run cancelled before {next} started"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PipelineOrchestrator
// ---------------------------------------------------------------------------

/// Runs songs and reference voices through the external tools.
///
/// One orchestrator can serve any number of concurrent runs; each run gets
/// its own [`RunWorkspace`].
///
/// ```rust,no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use voice_cover::audio::{AudioBlob, AudioRole};
/// use voice_cover::config::AppConfig;
/// use voice_cover::pipeline::{LogProgress, PipelineOrchestrator};
/// use voice_cover::process::SystemRunner;
///
/// # async fn example() {
/// let orchestrator = PipelineOrchestrator::new(AppConfig::default(), Arc::new(SystemRunner));
/// let song = AudioBlob::read_from(AudioRole::Song, Path::new("song.mp3")).await.unwrap();
/// let voice = AudioBlob::read_from(AudioRole::ReferenceVoice, Path::new("me.wav")).await.unwrap();
///
/// let mix = orchestrator.run(&song, &voice, Some(&LogProgress)).await.unwrap();
/// tokio::fs::write("cover.wav", mix.bytes()).await.unwrap();
/// # }
/// ```
pub struct PipelineOrchestrator {
    separator: Separator,
    trainer: Trainer,
    converter: Converter,
    mixer: Mixer,
    scratch_root: PathBuf,
    parallel_training: bool,
}

impl PipelineOrchestrator {
    pub fn new(config: AppConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            separator: Separator::new(config.separator, Arc::clone(&runner)),
            trainer: Trainer::new(config.trainer, Arc::clone(&runner)),
            converter: Converter::new(config.converter, Arc::clone(&runner)),
            mixer: Mixer::new(config.mixer, runner),
            scratch_root: config.workspace.resolved_scratch_root(),
            parallel_training: config.pipeline.parallel_training,
        }
    }

    /// Directory under which each run creates its `run-<uuid>` workspace.
    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Produce a cover of `song` sung in the voice of `voice`.
    pub async fn run(
        &self,
        song: &AudioBlob,
        voice: &AudioBlob,
        sink: Option<&dyn ProgressSink>,
    ) -> Result<AudioBlob, PipelineError> {
        self.run_with_cancel(song, voice, sink, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), aborting when `cancel` fires.
    ///
    /// Cancellation kills the running tool and fails the run with
    /// [`FailureKind::Cancelled`]. The workspace is released on every path.
    pub async fn run_with_cancel(
        &self,
        song: &AudioBlob,
        voice: &AudioBlob,
        sink: Option<&dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<AudioBlob, PipelineError> {
        let workspace = RunWorkspace::create(&self.scratch_root);
        let run_id = workspace.run_id();
        let progress = Progress::new(run_id, sink);

        log::info!(
            "run {}: starting ({} byte song, {} byte reference voice)",
            run_id.simple(),
            song.len(),
            voice.len()
        );

        let result = self
            .execute(&workspace, song, voice, &progress, &cancel)
            .await;

        let report = workspace.release();
        log::debug!(
            "run {}: workspace released ({} removed, {} missing, {} failed)",
            run_id.simple(),
            report.removed,
            report.missing,
            report.failed
        );

        match result {
            Ok(mix) => {
                progress.enter(PipelineState::Complete);
                log::info!("run {}: complete ({} bytes)", run_id.simple(), mix.len());
                Ok(mix)
            }
            Err(err) => {
                progress.enter(PipelineState::Failed { stage: err.stage });
                log::error!("run {}: {err}", run_id.simple());
                Err(PipelineError::from_stage(run_id, err))
            }
        }
    }

    async fn execute(
        &self,
        workspace: &RunWorkspace,
        song: &AudioBlob,
        voice: &AudioBlob,
        progress: &Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<AudioBlob, StageError> {
        let (tracks, model) = if self.parallel_training {
            self.separate_and_train_concurrently(workspace, song, voice, progress, cancel)
                .await?
        } else {
            ensure_not_cancelled(StageId::Separator, cancel)?;
            progress.enter(PipelineState::SeparatingVocals);
            let tracks = self.separator.separate(workspace, song, cancel).await?;

            ensure_not_cancelled(StageId::Trainer, cancel)?;
            progress.enter(PipelineState::TrainingModel);
            let model = self.trainer.train(workspace, voice, cancel).await?;
            (tracks, model)
        };

        let SeparatedTracks {
            vocals,
            instrumental,
        } = tracks;

        ensure_not_cancelled(StageId::Converter, cancel)?;
        progress.enter(PipelineState::ConvertingVoice);
        let converted = self
            .converter
            .convert(workspace, &vocals, &model, cancel)
            .await?;
        drop(vocals);

        ensure_not_cancelled(StageId::Mixer, cancel)?;
        progress.enter(PipelineState::Mixing);
        self.mixer
            .mix(workspace, &converted, &instrumental, cancel)
            .await
    }

    /// Separator and trainer share no inputs, so they may overlap. Progress
    /// moves to `TrainingModel` once separation has finished.
    async fn separate_and_train_concurrently(
        &self,
        workspace: &RunWorkspace,
        song: &AudioBlob,
        voice: &AudioBlob,
        progress: &Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<(SeparatedTracks, VoiceModel), StageError> {
        ensure_not_cancelled(StageId::Separator, cancel)?;
        progress.enter(PipelineState::SeparatingVocals);

        let separate = async {
            let tracks = self.separator.separate(workspace, song, cancel).await?;
            progress.enter(PipelineState::TrainingModel);
            Ok::<_, StageError>(tracks)
        };
        let train = self.trainer.train(workspace, voice, cancel);

        tokio::try_join!(separate, train)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioRole;
    use crate::config::{ConverterConfig, MixerConfig, SeparatorConfig, TrainerConfig};
    use crate::process::ScriptedRunner;
    use crate::stages::test_support::{arg, exit_code, exit_ok, template, write};
    use std::collections::HashSet;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn test_config(scratch: &Path, parallel: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.workspace.scratch_root = Some(scratch.to_path_buf());
        config.pipeline.parallel_training = parallel;
        config.separator = SeparatorConfig {
            program: "sep".into(),
            args: template(&["{input}", "{output_dir}"]),
            ..SeparatorConfig::default()
        };
        config.trainer = TrainerConfig {
            program: "train".into(),
            args: template(&["{input}", "{model_name}"]),
            model_name: Some("singer".into()),
            ..TrainerConfig::default()
        };
        config.converter = ConverterConfig {
            program: "convert".into(),
            args: template(&["{input}", "{model_id}", "{output}"]),
            ..ConverterConfig::default()
        };
        config.mixer = MixerConfig {
            program: "mix".into(),
            args: template(&["{vocals}", "{instrumental}", "{output}"]),
            ..MixerConfig::default()
        };
        config
    }

    /// All four tools behaving, except the ones in `failing`.
    fn tools(failing: &[StageId]) -> ScriptedRunner {
        let mut runner = ScriptedRunner::new();
        if !failing.contains(&StageId::Separator) {
            runner = runner.on("sep", |cmd| {
                let stem = arg(cmd, 0).file_stem().unwrap().to_owned();
                let dir = arg(cmd, 1).join("htdemucs").join(stem);
                write(&dir.join("vocals.wav"), b"VOX");
                write(&dir.join("no_vocals.wav"), b"INST");
                exit_ok("")
            });
        } else {
            runner = runner.on("sep", |cmd| exit_code(cmd, 1, "separator crashed"));
        }
        if !failing.contains(&StageId::Trainer) {
            runner = runner.on("train", |_| exit_ok("done\n"));
        } else {
            runner = runner.on("train", |cmd| exit_code(cmd, 2, "trainer crashed"));
        }
        if !failing.contains(&StageId::Converter) {
            runner = runner.on("convert", |cmd| {
                assert_eq!(std::fs::read(arg(cmd, 0)).unwrap(), b"VOX");
                assert_eq!(cmd.args[1], "singer");
                write(&arg(cmd, 2), b"CONVERTED");
                exit_ok("")
            });
        } else {
            runner = runner.on("convert", |cmd| exit_code(cmd, 3, "converter crashed"));
        }
        if !failing.contains(&StageId::Mixer) {
            runner = runner.on("mix", |cmd| {
                assert_eq!(std::fs::read(arg(cmd, 0)).unwrap(), b"CONVERTED");
                assert_eq!(std::fs::read(arg(cmd, 1)).unwrap(), b"INST");
                write(&arg(cmd, 2), b"FINAL MIX");
                exit_ok(format!("OUTPUT_FILE:{}\n", arg(cmd, 2).display()))
            });
        } else {
            runner = runner.on("mix", |cmd| exit_code(cmd, 4, "mixer crashed"));
        }
        runner
    }

    fn inputs() -> (AudioBlob, AudioBlob) {
        (
            AudioBlob::new(AudioRole::Song, b"SONG".to_vec()),
            AudioBlob::new(AudioRole::ReferenceVoice, b"VOICE".to_vec()),
        )
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    fn drain(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    const PROGRAMS: [(&str, StageId); 4] = [
        ("sep", StageId::Separator),
        ("train", StageId::Trainer),
        ("convert", StageId::Converter),
        ("mix", StageId::Mixer),
    ];

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn happy_path_produces_mix_and_reports_progress_in_order() {
        let scratch = tempdir().unwrap();
        let runner = Arc::new(tools(&[]));
        let orchestrator =
            PipelineOrchestrator::new(test_config(scratch.path(), false), runner.clone());
        let (song, voice) = inputs();
        let (tx, rx) = mpsc::unbounded_channel();

        let mix = orchestrator.run(&song, &voice, Some(&tx)).await.unwrap();

        assert_eq!(mix.role(), AudioRole::FinalMix);
        assert_eq!(mix.bytes(), b"FINAL MIX");
        assert_eq!(runner.invoked(), vec!["sep", "train", "convert", "mix"]);

        let events = drain(rx);
        let states: Vec<PipelineState> = events.iter().map(|e| e.state).collect();
        assert_eq!(
            states,
            vec![
                PipelineState::SeparatingVocals,
                PipelineState::TrainingModel,
                PipelineState::ConvertingVoice,
                PipelineState::Mixing,
                PipelineState::Complete,
            ]
        );
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![10, 35, 60, 85, 100]);
        assert!(events.windows(2).all(|w| w[0].run_id == w[1].run_id));

        assert!(is_empty_dir(scratch.path()), "workspace left behind");
    }

    #[tokio::test]
    async fn each_failure_is_attributed_and_stops_downstream_stages() {
        for (position, (program, stage)) in PROGRAMS.iter().enumerate() {
            let scratch = tempdir().unwrap();
            let runner = Arc::new(tools(&[*stage]));
            let orchestrator =
                PipelineOrchestrator::new(test_config(scratch.path(), false), runner.clone());
            let (song, voice) = inputs();
            let (tx, rx) = mpsc::unbounded_channel();

            let err = orchestrator.run(&song, &voice, Some(&tx)).await.unwrap_err();

            assert_eq!(err.stage, *stage);
            assert_eq!(err.kind, FailureKind::ExecutionFailure);
            assert_eq!(err.exit_code, Some(position as i32 + 1));
            assert!(err.detail.contains("crashed"), "{}", err.detail);

            let expected: Vec<&str> = PROGRAMS[..=position].iter().map(|(p, _)| *p).collect();
            assert_eq!(runner.invoked(), expected, "{program} failure");

            let events = drain(rx);
            let last = events.last().unwrap();
            assert_eq!(last.state, PipelineState::Failed { stage: *stage });
            assert_eq!(last.percent, events[events.len() - 2].percent);
            assert!(events.windows(2).all(|w| w[0].percent <= w[1].percent));

            assert!(is_empty_dir(scratch.path()), "{program} failure left files");
        }
    }

    #[tokio::test]
    async fn missing_separator_executable_is_a_launch_failure() {
        let scratch = tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let orchestrator =
            PipelineOrchestrator::new(test_config(scratch.path(), false), runner.clone());
        let (song, voice) = inputs();

        let err = orchestrator.run(&song, &voice, None).await.unwrap_err();

        assert_eq!(err.stage, StageId::Separator);
        assert_eq!(err.kind, FailureKind::LaunchFailure);
        assert!(err.detail.contains("separator.program"));
        assert_eq!(runner.invoked(), vec!["sep"]);
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn cancelled_run_invokes_nothing_and_cleans_up() {
        let scratch = tempdir().unwrap();
        let runner = Arc::new(tools(&[]));
        let orchestrator =
            PipelineOrchestrator::new(test_config(scratch.path(), false), runner.clone());
        let (song, voice) = inputs();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .run_with_cancel(&song, &voice, None, cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::Cancelled);
        assert_eq!(err.stage, StageId::Separator);
        assert!(runner.invoked().is_empty());
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn unusable_scratch_root_is_a_workspace_failure() {
        let dir = tempdir().unwrap();
        let not_a_dir = dir.path().join("scratch");
        std::fs::write(&not_a_dir, b"occupied").unwrap();

        let runner = Arc::new(tools(&[]));
        let orchestrator =
            PipelineOrchestrator::new(test_config(&not_a_dir, false), runner.clone());
        let (song, voice) = inputs();
        let (tx, rx) = mpsc::unbounded_channel();

        let err = orchestrator.run(&song, &voice, Some(&tx)).await.unwrap_err();

        assert_eq!(err.stage, StageId::Separator);
        assert_eq!(err.kind, FailureKind::WorkspaceError);
        assert_eq!(err.exit_code, None);
        assert!(runner.invoked().is_empty());
        let events = drain(rx);
        assert_eq!(
            events.last().map(|e| e.state),
            Some(PipelineState::Failed {
                stage: StageId::Separator
            })
        );
        assert_eq!(std::fs::read(&not_a_dir).unwrap(), b"occupied");
    }

    #[tokio::test]
    async fn cancellation_between_stages_stops_before_the_next_tool() {
        let scratch = tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let runner = Arc::new(tools(&[]).on("train", move |_| {
            trigger.cancel();
            exit_ok("")
        }));
        let orchestrator =
            PipelineOrchestrator::new(test_config(scratch.path(), false), runner.clone());
        let (song, voice) = inputs();

        let err = orchestrator
            .run_with_cancel(&song, &voice, None, cancel)
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::Cancelled);
        assert_eq!(err.stage, StageId::Converter);
        assert_eq!(runner.invoked(), vec!["sep", "train"]);
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn concurrent_runs_use_disjoint_workspaces() {
        let scratch = tempdir().unwrap();
        let runner = Arc::new(tools(&[]));
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            test_config(scratch.path(), false),
            runner.clone(),
        ));

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let orchestrator = Arc::clone(&orchestrator);
            handles.push(tokio::spawn(async move {
                let song = AudioBlob::new(AudioRole::Song, vec![i; 16]);
                let voice = AudioBlob::new(AudioRole::ReferenceVoice, vec![i; 8]);
                orchestrator.run(&song, &voice, None).await
            }));
        }
        let mut run_ids = HashSet::new();
        for handle in handles {
            let mix = handle.await.unwrap().unwrap();
            assert_eq!(mix.bytes(), b"FINAL MIX");
        }

        for cmd in runner.commands() {
            if cmd.program == "sep" {
                let run_dir = arg(&cmd, 0).parent().unwrap().to_path_buf();
                assert!(run_ids.insert(run_dir), "two runs shared a workspace");
            }
        }
        assert_eq!(run_ids.len(), 8);
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn parallel_training_reaches_the_same_result() {
        let scratch = tempdir().unwrap();
        let runner = Arc::new(tools(&[]));
        let orchestrator =
            PipelineOrchestrator::new(test_config(scratch.path(), true), runner.clone());
        let (song, voice) = inputs();
        let (tx, rx) = mpsc::unbounded_channel();

        let mix = orchestrator.run(&song, &voice, Some(&tx)).await.unwrap();
        assert_eq!(mix.bytes(), b"FINAL MIX");

        let invoked = runner.invoked();
        assert_eq!(&invoked[2..], ["convert", "mix"]);
        let percents: Vec<u8> = drain(rx).iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![10, 35, 60, 85, 100]);
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn parallel_trainer_failure_skips_conversion() {
        let scratch = tempdir().unwrap();
        let runner = Arc::new(tools(&[StageId::Trainer]));
        let orchestrator =
            PipelineOrchestrator::new(test_config(scratch.path(), true), runner.clone());
        let (song, voice) = inputs();

        let err = orchestrator.run(&song, &voice, None).await.unwrap_err();

        assert_eq!(err.stage, StageId::Trainer);
        let invoked = runner.invoked();
        assert!(!invoked.iter().any(|p| p == "convert" || p == "mix"));
        assert!(is_empty_dir(scratch.path()));
    }

    #[test]
    fn summary_is_a_single_line() {
        let err = PipelineError {
            run_id: Uuid::nil(),
            stage: StageId::Converter,
            kind: FailureKind::ExecutionFailure,
            exit_code: Some(1),
            detail: "`python` exited with code 1:\nTraceback\nValueError".into(),
        };
        assert_eq!(
            err.summary(),
            "converter stage failed (execution failure): `python` exited with code 1:"
        );
    }
}
