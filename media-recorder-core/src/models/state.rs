use super::error::RecorderError;
use super::recording_result::RecordingResult;

/// Recording session state machine.
///
/// State transitions:
/// ```text
/// idle → prepared → recording → stopping → completed
///   ↓                                         
/// failed (prepare-time error)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Prepared,
    Recording,
    Stopping,
    /// Finalized. Holds the result when the container received samples.
    Completed(Option<Box<RecordingResult>>),
    Failed(RecorderError),
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}
