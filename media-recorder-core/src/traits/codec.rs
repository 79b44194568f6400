use std::sync::Arc;
use std::time::Duration;

use crate::models::error::RecorderError;
use crate::models::media_format::{BufferFlags, BufferInfo, ColorFormat, MediaFormat};

/// Description of a codec the platform offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    pub name: String,
    pub is_encoder: bool,
    /// MIME types this codec handles.
    pub supported_types: Vec<String>,
    /// Input color formats (video codecs only).
    pub color_formats: Vec<ColorFormat>,
}

impl CodecInfo {
    pub fn supports(&self, mime: &str) -> bool {
        self.supported_types.iter().any(|t| t.eq_ignore_ascii_case(mime))
    }
}

/// Outcome of a non-blocking output poll.
#[derive(Debug, Clone, PartialEq)]
pub enum DequeueStatus {
    /// No output within the timeout.
    TryAgainLater,
    /// The codec negotiated its output format. Emitted once, before any data.
    FormatChanged(MediaFormat),
    /// Legacy notification, safe to ignore.
    OutputBuffersChanged,
    /// A compressed buffer is ready. Must be handed back with
    /// [`Codec::release_output_buffer`].
    Buffer { index: usize, info: BufferInfo },
}

/// Codec-owned surface that receives video frames drawn by a render worker.
pub trait InputSurface: Send + Sync {
    /// Queue the frame currently held by the surface with `presentation_time_us`.
    fn queue_frame(&self, presentation_time_us: i64) -> Result<(), RecorderError>;

    /// Detach the surface from the codec. Further frames are rejected.
    fn release(&self);

    fn is_released(&self) -> bool;
}

/// Hardware or software encoder instance.
///
/// All methods take `&self`: the drain thread, the render worker and the
/// caller's audio thread use the codec concurrently.
pub trait Codec: Send + Sync {
    fn name(&self) -> &str;

    fn configure(&self, format: &MediaFormat) -> Result<(), RecorderError>;

    /// Create the input surface. Only valid between `configure` and `start`.
    fn create_input_surface(&self) -> Result<Arc<dyn InputSurface>, RecorderError>;

    fn start(&self) -> Result<(), RecorderError>;

    /// Submit one input buffer. Returns `Ok(false)` when no input slot is free.
    fn queue_input(&self, data: &[u8], presentation_time_us: i64, flags: BufferFlags) -> Result<bool, RecorderError>;

    /// Signal end of input for surface-fed codecs.
    fn signal_end_of_input_stream(&self) -> Result<(), RecorderError>;

    /// Poll for output, waiting at most `timeout`.
    fn dequeue_output(&self, timeout: Duration) -> Result<DequeueStatus, RecorderError>;

    /// Borrow the bytes of a dequeued output buffer for the duration of `f`.
    fn with_output_buffer(&self, index: usize, f: &mut dyn FnMut(&[u8])) -> Result<(), RecorderError>;

    /// Return a dequeued output buffer to the codec.
    fn release_output_buffer(&self, index: usize) -> Result<(), RecorderError>;

    fn stop(&self) -> Result<(), RecorderError>;

    fn release(&self);
}

/// Platform codec enumeration and instantiation.
pub trait CodecProvider: Send + Sync {
    fn codec_infos(&self) -> Vec<CodecInfo>;

    fn create_codec(&self, info: &CodecInfo, mime: &str) -> Result<Arc<dyn Codec>, RecorderError>;
}
