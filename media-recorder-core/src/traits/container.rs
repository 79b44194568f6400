use std::path::Path;

use crate::models::error::RecorderError;
use crate::models::media_format::{BufferInfo, MediaFormat};
use crate::models::recording_result::TrackSummary;

/// Interleaved container file writer.
///
/// `add_track` is only valid before `start`; `write_sample_data` only
/// between `start` and `stop`.
pub trait ContainerWriter: Send {
    fn add_track(&mut self, format: &MediaFormat) -> Result<usize, RecorderError>;

    fn start(&mut self) -> Result<(), RecorderError>;

    fn write_sample_data(&mut self, track_index: usize, data: &[u8], info: &BufferInfo) -> Result<(), RecorderError>;

    /// Finalize the file and report what was written.
    fn stop(&mut self) -> Result<Vec<TrackSummary>, RecorderError>;

    fn path(&self) -> &Path;
}

/// Factory for one container format with a fixed file extension.
pub trait ContainerFormat: Send + Sync {
    /// Extension without the leading dot.
    fn extension(&self) -> &str;

    fn create(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, RecorderError>;
}
