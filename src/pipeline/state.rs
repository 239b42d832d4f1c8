//! Pipeline state machine and the progress side channel.
//!
//! [`PipelineState`] is the orchestrator's position in a run. Every
//! transition is reported to an optional [`ProgressSink`] as a
//! [`ProgressEvent`]; the sink never influences the run.

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::stages::StageId;

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// States of one voice-cover run.
///
/// ```text
/// Idle ──▶ SeparatingVocals ──▶ TrainingModel ──▶ ConvertingVoice ──▶ Mixing ──▶ Complete
///   any non-terminal state ──stage error──▶ Failed { stage }
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Run accepted, no stage started yet.
    #[default]
    Idle,
    SeparatingVocals,
    TrainingModel,
    ConvertingVoice,
    Mixing,
    /// The final mix was produced and scratch storage released.
    Complete,
    /// `stage` failed; nothing downstream of it ran.
    Failed { stage: StageId },
}

impl PipelineState {
    /// Fixed completion percentage for this state.
    ///
    /// `Failed` has none of its own; the orchestrator repeats the last
    /// percentage it reported.
    ///
    /// ```
    /// use voice_cover::pipeline::PipelineState;
    /// use voice_cover::stages::StageId;
    ///
    /// assert_eq!(PipelineState::Idle.percent(), Some(0));
    /// assert_eq!(PipelineState::ConvertingVoice.percent(), Some(60));
    /// assert_eq!(PipelineState::Complete.percent(), Some(100));
    /// assert_eq!(PipelineState::Failed { stage: StageId::Mixer }.percent(), None);
    /// ```
    pub fn percent(&self) -> Option<u8> {
        match self {
            PipelineState::Idle => Some(0),
            PipelineState::SeparatingVocals => Some(10),
            PipelineState::TrainingModel => Some(35),
            PipelineState::ConvertingVoice => Some(60),
            PipelineState::Mixing => Some(85),
            PipelineState::Complete => Some(100),
            PipelineState::Failed { .. } => None,
        }
    }

    /// `true` for `Complete` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Complete | PipelineState::Failed { .. })
    }

    /// A short human-readable label for logs and status lines.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::SeparatingVocals => "Separating vocals",
            PipelineState::TrainingModel => "Training voice model",
            PipelineState::ConvertingVoice => "Converting voice",
            PipelineState::Mixing => "Mixing",
            PipelineState::Complete => "Complete",
            PipelineState::Failed { .. } => "Failed",
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressEvent / ProgressSink
// ---------------------------------------------------------------------------

/// One state transition of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub percent: u8,
}

/// Receiver of progress events.
///
/// Implementations must not block: `emit` is called inline on the run's task.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Forward events over a channel. A closed receiver is ignored.
impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

/// Write each event to the `log` facade at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: ProgressEvent) {
        match event.state {
            PipelineState::Failed { stage } => log::info!(
                "[{:>3}%] run {}: failed during {stage}",
                event.percent,
                event.run_id.simple()
            ),
            state => log::info!(
                "[{:>3}%] run {}: {}",
                event.percent,
                event.run_id.simple(),
                state.label()
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const HAPPY_PATH: [PipelineState; 6] = [
        PipelineState::Idle,
        PipelineState::SeparatingVocals,
        PipelineState::TrainingModel,
        PipelineState::ConvertingVoice,
        PipelineState::Mixing,
        PipelineState::Complete,
    ];

    #[test]
    fn percentages_increase_along_the_happy_path() {
        let percents: Vec<u8> = HAPPY_PATH.iter().filter_map(|s| s.percent()).collect();
        assert_eq!(percents, vec![0, 10, 35, 60, 85, 100]);
    }

    #[test]
    fn only_complete_and_failed_are_terminal() {
        for state in &HAPPY_PATH[..5] {
            assert!(!state.is_terminal(), "{state:?}");
        }
        assert!(PipelineState::Complete.is_terminal());
        assert!(PipelineState::Failed {
            stage: StageId::Separator
        }
        .is_terminal());
    }

    #[test]
    fn default_state_is_idle() {
        assert_eq!(PipelineState::default(), PipelineState::Idle);
    }

    #[test]
    fn channel_sink_forwards_and_tolerates_closed_receiver() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = ProgressEvent {
            run_id: Uuid::new_v4(),
            state: PipelineState::Mixing,
            percent: 85,
        };
        tx.emit(event);
        assert_eq!(rx.try_recv().unwrap(), event);

        drop(rx);
        tx.emit(event);
    }

    #[test]
    fn event_serializes_to_json() {
        let run_id = Uuid::nil();
        let json = serde_json::to_value(ProgressEvent {
            run_id,
            state: PipelineState::TrainingModel,
            percent: 35,
        })
        .unwrap();
        assert_eq!(json["state"], "training_model");
        assert_eq!(json["percent"], 35);

        let failed = serde_json::to_value(ProgressEvent {
            run_id,
            state: PipelineState::Failed {
                stage: StageId::Converter,
            },
            percent: 60,
        })
        .unwrap();
        assert_eq!(failed["state"]["failed"]["stage"], "converter");
    }

    #[test]
    fn sinks_are_object_safe_and_shareable() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn ProgressSink>();
    }
}
