use crate::models::error::RecorderError;
use crate::models::media_format::TrackKind;

/// Per-track lifecycle notifications of a recording session.
///
/// Called from whichever thread drives the transition (the caller's thread
/// for `on_prepared`, the drain thread for `on_stopped`).
pub trait RecorderListener: Send + Sync {
    /// The track's codec is configured and started.
    fn on_prepared(&self, track: TrackKind);

    /// The track's codec and render worker are released.
    fn on_stopped(&self, track: TrackKind);

    /// The track failed and was dropped from the session.
    fn on_error(&self, track: TrackKind, error: &RecorderError);
}
