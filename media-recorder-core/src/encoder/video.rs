use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::track::{TrackEncoder, TrackSource};
use crate::models::config::{RenderSettings, VideoEncoderConfig};
use crate::models::error::RecorderError;
use crate::models::media_format::{MediaFormat, TrackKind};
use crate::render::encode_stage::EncodeRenderStage;
use crate::render::offscreen::FrameSource;
use crate::render::worker::{FrameSink, RenderWorker};
use crate::traits::codec::{Codec, InputSurface};
use crate::traits::graphics::FrameAvailableListener;

/// Feeds a video codec through its input surface.
///
/// The codec surface is created between configure and start; once the codec
/// runs, a [`RenderWorker`] redraws the upstream texture into it whenever the
/// upstream renderer reports a new frame.
pub struct VideoSource {
    config: VideoEncoderConfig,
    render: RenderSettings,
    frames: FrameSource,
    surface: Mutex<Option<Arc<dyn InputSurface>>>,
    worker: Mutex<Option<RenderWorker>>,
}

impl VideoSource {
    pub fn new(config: VideoEncoderConfig, render: RenderSettings, frames: FrameSource) -> Self {
        Self {
            config,
            render,
            frames,
            surface: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Encoded size: the configured one, or the upstream viewport.
    pub fn size(&self) -> (u32, u32) {
        self.config.size.unwrap_or((self.frames.width, self.frames.height))
    }
}

impl TrackSource for VideoSource {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn output_format(&self) -> MediaFormat {
        let (width, height) = self.size();
        let mut format = MediaFormat::video(&self.config.mime, width, height);
        format.frame_rate = self.config.frame_rate;
        format.bit_rate = self.config.bit_rate(width, height);
        format.i_frame_interval_secs = self.config.i_frame_interval_secs;
        format
    }

    fn on_configured(&self, codec: &Arc<dyn Codec>) -> Result<(), RecorderError> {
        *self.surface.lock() = Some(codec.create_input_surface()?);
        Ok(())
    }

    fn on_started(&self, encoder: &Arc<TrackEncoder>) -> Result<(), RecorderError> {
        let surface = self
            .surface
            .lock()
            .clone()
            .ok_or_else(|| RecorderError::InvalidState("video codec has no input surface".into()))?;

        let stage = EncodeRenderStage::new(self.frames.context.gl(), self.frames.texture, self.render.transform);
        let owner: Weak<dyn FrameSink> = Arc::downgrade(encoder) as Weak<TrackEncoder>;
        let mut worker = RenderWorker::new(
            Arc::clone(&self.frames.context),
            Box::new(stage),
            surface,
            owner,
            self.size(),
            self.render.wait_timeout,
        );
        worker.start()?;
        *self.worker.lock() = Some(worker);

        let listener: Weak<dyn FrameAvailableListener> = Arc::downgrade(encoder) as Weak<TrackEncoder>;
        self.frames.listener.set(listener);
        Ok(())
    }

    fn request_render(&self, presentation_time_us: i64) -> bool {
        match self.worker.lock().as_ref() {
            Some(worker) => {
                worker.request_render(presentation_time_us);
                true
            }
            None => false,
        }
    }

    fn signal_end_of_stream(&self, codec: &dyn Codec, _last_pts_us: i64) -> Result<(), RecorderError> {
        codec.signal_end_of_input_stream()
    }

    fn release(&self) {
        self.frames.listener.clear();
        // The worker may still be swapping into the surface: join it first.
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.exit();
            worker.join();
        }
        if let Some(surface) = self.surface.lock().take() {
            surface.release();
        }
    }
}
