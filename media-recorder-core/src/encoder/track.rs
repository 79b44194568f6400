use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::models::config::DrainSettings;
use crate::models::error::RecorderError;
use crate::models::media_format::{select_color_format, BufferFlags, BufferInfo, ColorFormat, MediaFormat, TrackKind};
use crate::muxer::coordinator::{MuxedTrack, MuxerCoordinator};
use crate::render::worker::FrameSink;
use crate::traits::codec::{Codec, CodecInfo, CodecProvider, DequeueStatus};
use crate::traits::graphics::FrameAvailableListener;
use crate::traits::listener::RecorderListener;

/// Track-specific half of a [`TrackEncoder`]: what feeds the codec.
pub trait TrackSource: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Format to configure the codec with. The color format is filled in
    /// from codec selection.
    fn output_format(&self) -> MediaFormat;

    /// Called between `configure` and `start`.
    fn on_configured(&self, _codec: &Arc<dyn Codec>) -> Result<(), RecorderError> {
        Ok(())
    }

    /// Called once the codec is running.
    fn on_started(&self, _encoder: &Arc<TrackEncoder>) -> Result<(), RecorderError> {
        Ok(())
    }

    /// Forward a redraw request. Returns false when nothing can draw.
    fn request_render(&self, _presentation_time_us: i64) -> bool {
        false
    }

    fn signal_end_of_stream(&self, codec: &dyn Codec, last_pts_us: i64) -> Result<(), RecorderError>;

    /// Drop everything attached to the codec. Must be idempotent.
    fn release(&self) {}
}

/// Pick the first encoder that handles `mime`. Video codecs must also
/// accept one of the recognized input color formats.
pub fn select_codec(
    provider: &dyn CodecProvider,
    kind: TrackKind,
    mime: &str,
) -> Result<(CodecInfo, Option<ColorFormat>), RecorderError> {
    for info in provider.codec_infos() {
        if !info.is_encoder || !info.supports(mime) {
            continue;
        }
        match kind {
            TrackKind::Audio => {
                log::debug!("codec: selected {} for {}", info.name, mime);
                return Ok((info, None));
            }
            TrackKind::Video => match select_color_format(&info.color_formats) {
                Some(color) => {
                    log::debug!("codec: selected {} for {} ({:?})", info.name, mime, color);
                    return Ok((info, Some(color)));
                }
                None => log::debug!("codec: {} has no usable color format", info.name),
            },
        }
    }
    log::error!("codec: no encoder for {}", mime);
    Err(RecorderError::CodecNotFound { mime: mime.to_string() })
}

/// Keeps output timestamps non-decreasing.
#[derive(Debug)]
struct PtsStamper {
    origin: Instant,
    prev_us: i64,
    stamped: u64,
}

impl PtsStamper {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            prev_us: 0,
            stamped: 0,
        }
    }

    fn stamp(&mut self, presentation_time_us: i64) -> i64 {
        let mut pts = presentation_time_us;
        if pts == 0 && self.stamped > 0 {
            pts = self.origin.elapsed().as_micros() as i64;
        }
        if pts < self.prev_us {
            pts = self.prev_us;
        }
        self.prev_us = pts;
        self.stamped += 1;
        pts
    }
}

struct DrainControl {
    capturing: bool,
    request_stop: bool,
    request_drain: u32,
    last_input_pts_us: i64,
}

struct OutputState {
    track_index: Option<usize>,
    muxer_started: bool,
    is_eos: bool,
    stamper: PtsStamper,
    samples_written: u64,
}

/// One codec bound to one container track.
///
/// Lifecycle: [`prepare`](Self::prepare) → [`start_recording`](Self::start_recording)
/// → drain requests → [`stop_recording`](Self::stop_recording); the drain
/// thread then flushes, signals end of stream, drains to the codec's EOS
/// buffer and releases everything.
pub struct TrackEncoder {
    me: Weak<TrackEncoder>,
    kind: TrackKind,
    source: Box<dyn TrackSource>,
    coordinator: Arc<MuxerCoordinator>,
    listener: Option<Arc<dyn RecorderListener>>,
    settings: DrainSettings,
    codec: Mutex<Option<Arc<dyn Codec>>>,
    control: Mutex<DrainControl>,
    cond: Condvar,
    output: Mutex<OutputState>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    drain_thread: Mutex<Option<ThreadId>>,
    released: AtomicBool,
}

impl TrackEncoder {
    pub fn new(
        source: Box<dyn TrackSource>,
        coordinator: Arc<MuxerCoordinator>,
        listener: Option<Arc<dyn RecorderListener>>,
        settings: DrainSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            kind: source.kind(),
            source,
            coordinator,
            listener,
            settings,
            codec: Mutex::new(None),
            control: Mutex::new(DrainControl {
                capturing: false,
                request_stop: false,
                request_drain: 0,
                last_input_pts_us: 0,
            }),
            cond: Condvar::new(),
            output: Mutex::new(OutputState {
                track_index: None,
                muxer_started: false,
                is_eos: false,
                stamper: PtsStamper::new(),
                samples_written: 0,
            }),
            handle: Mutex::new(None),
            drain_thread: Mutex::new(None),
            released: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_prepared(&self) -> bool {
        self.codec.lock().is_some()
    }

    pub fn is_capturing(&self) -> bool {
        self.control.lock().capturing
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn track_index(&self) -> Option<usize> {
        self.output.lock().track_index
    }

    pub fn samples_written(&self) -> u64 {
        self.output.lock().samples_written
    }

    /// Whether `id` is (or was) this encoder's drain thread.
    pub fn is_drain_thread(&self, id: ThreadId) -> bool {
        *self.drain_thread.lock() == Some(id)
    }

    /// Select, configure and start the codec. Not retried on failure.
    pub fn prepare(&self, provider: &dyn CodecProvider) -> Result<(), RecorderError> {
        if self.is_released() {
            return Err(RecorderError::InvalidState(format!("{} encoder already released", self.kind)));
        }
        if self.is_prepared() {
            return Ok(());
        }
        let me = self
            .me
            .upgrade()
            .ok_or_else(|| RecorderError::InvalidState("encoder dropped".into()))?;

        let mut format = self.source.output_format();
        let (info, color) = select_codec(provider, self.kind, &format.mime)?;
        format.color_format = color;

        let codec = provider.create_codec(&info, &format.mime)?;
        let result = codec
            .configure(&format)
            .and_then(|_| self.source.on_configured(&codec))
            .and_then(|_| codec.start())
            .and_then(|_| self.source.on_started(&me));
        if let Err(e) = result {
            log::error!("{} encoder: prepare failed: {}", self.kind, e);
            self.source.release();
            if let Err(stop) = codec.stop() {
                log::debug!("{} encoder: stop after failed prepare: {}", self.kind, stop);
            }
            codec.release();
            return Err(e);
        }

        log::info!("{} encoder prepared with {} ({})", self.kind, info.name, format.mime);
        *self.codec.lock() = Some(codec);
        if let Some(listener) = &self.listener {
            listener.on_prepared(self.kind);
        }
        Ok(())
    }

    /// Mark capturing and spawn the drain thread.
    pub fn start_recording(&self) -> Result<(), RecorderError> {
        if !self.is_prepared() {
            log::warn!("{} encoder: start_recording before prepare", self.kind);
            return Ok(());
        }
        let me = self
            .me
            .upgrade()
            .ok_or_else(|| RecorderError::InvalidState("encoder dropped".into()))?;
        {
            let mut c = self.control.lock();
            if c.capturing || self.handle.lock().is_some() {
                return Ok(());
            }
            c.capturing = true;
            c.request_stop = false;
            c.request_drain = 0;
        }
        self.output.lock().stamper = PtsStamper::new();

        let handle = thread::Builder::new()
            .name(format!("{}-encoder-drain", self.kind))
            .spawn(move || me.run())
            .map_err(|e| {
                self.control.lock().capturing = false;
                RecorderError::Unknown(format!("failed to spawn drain thread: {}", e))
            })?;
        *self.handle.lock() = Some(handle);
        log::info!("{} encoder: recording started", self.kind);
        Ok(())
    }

    /// Count one drain request. Returns false unless capturing with no
    /// stop pending.
    pub fn frame_available_soon(&self) -> bool {
        let mut c = self.control.lock();
        if !c.capturing || c.request_stop {
            return false;
        }
        c.request_drain = c.request_drain.saturating_add(1);
        self.cond.notify_all();
        true
    }

    /// A new upstream frame exists at `presentation_time_us`: request a
    /// drain and a redraw into the codec surface.
    pub fn frame_available_at(&self, presentation_time_us: i64) -> bool {
        self.frame_available_soon() && self.source.request_render(presentation_time_us)
    }

    /// Queue one raw input buffer into the codec and request a drain.
    pub fn queue_input(&self, data: &[u8], presentation_time_us: i64) -> Result<bool, RecorderError> {
        {
            let mut c = self.control.lock();
            if !c.capturing || c.request_stop {
                return Ok(false);
            }
            c.last_input_pts_us = presentation_time_us;
        }
        let Some(codec) = self.codec.lock().clone() else {
            return Ok(false);
        };
        let queued = codec.queue_input(data, presentation_time_us, BufferFlags::NONE)?;
        if queued {
            self.frame_available_soon();
        }
        Ok(queued)
    }

    /// Poll the codec until it runs dry and forward output to the muxer.
    pub fn drain(&self) {
        let Some(codec) = self.codec.lock().clone() else {
            return;
        };

        let mut empty_polls = 0u32;
        loop {
            if !self.control.lock().capturing {
                break;
            }
            let status = match codec.dequeue_output(self.settings.poll_timeout) {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("{} encoder: dequeue failed: {}", self.kind, e);
                    break;
                }
            };

            match status {
                DequeueStatus::TryAgainLater => {
                    empty_polls += 1;
                    if !self.output.lock().is_eos {
                        if empty_polls > self.settings.idle_polls_before_yield {
                            break;
                        }
                    } else if empty_polls > self.settings.eos_stall_budget {
                        log::warn!(
                            "{} encoder: no end-of-stream after {} polls, giving up",
                            self.kind,
                            empty_polls
                        );
                        break;
                    }
                }
                DequeueStatus::OutputBuffersChanged => {}
                DequeueStatus::FormatChanged(format) => {
                    if !self.on_format_changed(&format) {
                        break;
                    }
                }
                DequeueStatus::Buffer { index, info } => {
                    empty_polls = 0;
                    let end_of_stream = info.flags.contains(BufferFlags::END_OF_STREAM);
                    self.write_output(&*codec, index, info);
                    if let Err(e) = codec.release_output_buffer(index) {
                        log::warn!("{} encoder: release buffer {}: {}", self.kind, index, e);
                    }
                    if end_of_stream {
                        log::debug!("{} encoder: end of stream reached", self.kind);
                        self.control.lock().capturing = false;
                        break;
                    }
                }
            }
        }
    }

    /// Register the track and wait for the muxer barrier. Returns false if
    /// draining should stop.
    fn on_format_changed(&self, format: &MediaFormat) -> bool {
        if self.output.lock().muxer_started {
            log::error!("{} encoder: output format changed twice", self.kind);
            return true;
        }
        let index = match self.coordinator.add_track(format) {
            Ok(index) => index,
            Err(e) => {
                log::error!("{} encoder: failed to add track: {}", self.kind, e);
                return false;
            }
        };
        {
            let mut o = self.output.lock();
            o.track_index = Some(index);
            o.muxer_started = true;
        }

        if !self.coordinator.start() {
            log::debug!("{} encoder: waiting for the other tracks", self.kind);
            while !self.coordinator.wait_started(self.settings.muxer_start_wait) {
                if self.coordinator.is_released() || self.control.lock().request_stop {
                    log::warn!("{} encoder: muxer never started", self.kind);
                    break;
                }
            }
        }
        true
    }

    fn write_output(&self, codec: &dyn Codec, index: usize, mut info: BufferInfo) {
        if info.flags.contains(BufferFlags::CODEC_CONFIG) {
            log::debug!("{} encoder: skipping codec config ({} bytes)", self.kind, info.size);
            return;
        }
        if info.size == 0 {
            return;
        }

        let mut o = self.output.lock();
        let Some(track_index) = o.track_index.filter(|_| o.muxer_started) else {
            log::error!("{} encoder: output before the track was registered", self.kind);
            return;
        };
        info.presentation_time_us = o.stamper.stamp(info.presentation_time_us);

        let mut written = false;
        let result = codec.with_output_buffer(index, &mut |data| {
            written = self.coordinator.write_sample_data(track_index, data, &info);
        });
        match result {
            Ok(()) if written => o.samples_written += 1,
            Ok(()) => {}
            Err(e) => log::warn!("{} encoder: output buffer {}: {}", self.kind, index, e),
        }
    }

    /// Tell the codec no more input follows.
    pub fn signal_end_of_stream(&self) {
        let last_pts = self.control.lock().last_input_pts_us;
        if let Some(codec) = self.codec.lock().clone() {
            if let Err(e) = self.source.signal_end_of_stream(&*codec, last_pts) {
                log::warn!("{} encoder: end-of-stream signal failed: {}", self.kind, e);
            }
        }
        self.output.lock().is_eos = true;
    }

    /// Ask the drain thread to finish. Idempotent, does not wait.
    pub fn stop_recording(&self) {
        let mut c = self.control.lock();
        if !c.capturing || c.request_stop {
            return;
        }
        c.request_stop = true;
        self.cond.notify_all();
        log::info!("{} encoder: stop requested", self.kind);
    }

    /// Wait for the drain thread to terminate.
    pub fn join(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("{} encoder: drain thread panicked", self.kind);
        }
    }

    /// Tear down the render worker, input surface and codec. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut c = self.control.lock();
            c.capturing = false;
            c.request_stop = true;
            self.cond.notify_all();
        }

        self.source.release();
        let codec = self.codec.lock().take();
        if let Some(codec) = &codec {
            if let Err(e) = codec.stop() {
                log::warn!("{} encoder: codec stop failed: {}", self.kind, e);
            }
            codec.release();
        }

        let was_muxing = std::mem::replace(&mut self.output.lock().muxer_started, false);
        if was_muxing {
            self.coordinator.stop_track();
        }

        if codec.is_some() {
            log::info!("{} encoder released", self.kind);
            if let Some(listener) = &self.listener {
                listener.on_stopped(self.kind);
            }
        }
    }

    fn run(self: Arc<Self>) {
        *self.drain_thread.lock() = Some(thread::current().id());
        loop {
            let (stop, drain) = {
                let mut c = self.control.lock();
                loop {
                    if c.request_stop || c.request_drain > 0 {
                        break;
                    }
                    self.cond.wait(&mut c);
                }
                let drain = c.request_drain > 0;
                if drain {
                    c.request_drain -= 1;
                }
                (c.request_stop, drain)
            };

            if stop {
                self.drain();
                self.signal_end_of_stream();
                self.drain();
                self.release();
                break;
            }
            if drain {
                self.drain();
            }
        }

        let mut c = self.control.lock();
        c.request_stop = true;
        c.capturing = false;
        log::debug!("{} encoder: drain thread finished", self.kind);
    }
}

impl Drop for TrackEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

impl FrameSink for TrackEncoder {
    fn frame_rendered(&self) -> bool {
        self.frame_available_soon()
    }
}

impl FrameAvailableListener for TrackEncoder {
    fn on_frame_available(&self, presentation_time_us: i64) {
        self.frame_available_at(presentation_time_us);
    }
}

impl MuxedTrack for TrackEncoder {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn start_recording(&self) -> Result<(), RecorderError> {
        TrackEncoder::start_recording(self)
    }

    fn stop_recording(&self) {
        TrackEncoder::stop_recording(self)
    }

    fn join(&self) {
        TrackEncoder::join(self)
    }

    fn release(&self) {
        TrackEncoder::release(self)
    }
}
