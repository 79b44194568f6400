//! Software codec backend.
//!
//! A CPU-only [`CodecProvider`] whose codecs follow the buffering model of a
//! hardware encoder: the output format is announced once, a codec-config
//! buffer precedes the first frame, output is polled with a timeout and every
//! dequeued buffer must be handed back. The "compressed" payload is a small
//! deterministic packet per input frame, enough to exercise the pipeline
//! without a platform encoder.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::error::RecorderError;
use crate::models::media_format::{
    BufferFlags, BufferInfo, ColorFormat, MediaFormat, TrackKind, MIME_AUDIO_AAC, MIME_VIDEO_AVC,
};
use crate::traits::codec::{Codec, CodecInfo, CodecProvider, DequeueStatus, InputSurface};

/// Input slots available before `queue_input` reports back-pressure.
const MAX_PENDING_OUTPUT: usize = 64;

const VIDEO_CSD: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0x80, 0x1f, 0, 0, 0, 1, 0x68, 0xce, 0x06, 0xe2];
const AUDIO_CSD: &[u8] = &[0x12, 0x08];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecPhase {
    Uninitialized,
    Configured,
    Started,
    Stopped,
    Released,
}

struct PendingOutput {
    data: Vec<u8>,
    info: BufferInfo,
}

struct CodecState {
    phase: CodecPhase,
    format: Option<MediaFormat>,
    surface_input: bool,
    surface_created: bool,
    pending: VecDeque<PendingOutput>,
    dequeued: HashMap<usize, PendingOutput>,
    next_index: usize,
    format_reported: bool,
    config_emitted: bool,
    frames_encoded: u64,
    last_pts_us: i64,
    input_eos: bool,
    output_eos: bool,
    withhold_eos: bool,
}

struct CodecShared {
    state: Mutex<CodecState>,
    cond: Condvar,
}

impl CodecShared {
    fn encode(&self, kind: TrackKind, input: &[u8], presentation_time_us: i64) -> Result<bool, RecorderError> {
        let mut s = self.state.lock();
        if s.phase != CodecPhase::Started {
            return Err(RecorderError::CodecError("codec not started".into()));
        }
        if s.input_eos {
            return Err(RecorderError::CodecError("input after end of stream".into()));
        }
        if s.pending.len() >= MAX_PENDING_OUTPUT {
            return Ok(false);
        }

        if !s.config_emitted {
            s.config_emitted = true;
            let csd = match kind {
                TrackKind::Video => VIDEO_CSD,
                TrackKind::Audio => AUDIO_CSD,
            };
            s.pending.push_back(PendingOutput {
                data: csd.to_vec(),
                info: BufferInfo {
                    offset: 0,
                    size: csd.len(),
                    presentation_time_us: 0,
                    flags: BufferFlags::CODEC_CONFIG,
                },
            });
        }

        let frame = s.frames_encoded;
        let (payload, flags) = match kind {
            TrackKind::Video => {
                let gop = s
                    .format
                    .as_ref()
                    .map(|f| (f.frame_rate.max(1) * f.i_frame_interval_secs) as u64)
                    .unwrap_or(0);
                let key = gop == 0 || frame % gop == 0;
                let mut data = vec![0, 0, 0, 1, if key { 0x65 } else { 0x41 }];
                data.extend_from_slice(&frame.to_be_bytes());
                data.extend_from_slice(&presentation_time_us.to_be_bytes());
                (data, if key { BufferFlags::KEY_FRAME } else { BufferFlags::NONE })
            }
            TrackKind::Audio => {
                let mut data = vec![0xff, 0xf1];
                data.extend_from_slice(&(input.len() as u32).to_be_bytes());
                data.extend(input.iter().take(32));
                (data, BufferFlags::KEY_FRAME)
            }
        };

        s.frames_encoded += 1;
        s.last_pts_us = presentation_time_us;
        s.pending.push_back(PendingOutput {
            info: BufferInfo {
                offset: 0,
                size: payload.len(),
                presentation_time_us,
                flags,
            },
            data: payload,
        });
        self.cond.notify_all();
        Ok(true)
    }
}

/// Software encoder instance created by [`SoftwareCodecProvider`].
pub struct SoftwareCodec {
    name: String,
    kind: TrackKind,
    shared: Arc<CodecShared>,
}

impl SoftwareCodec {
    fn new(name: &str, kind: TrackKind, withhold_eos: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            shared: Arc::new(CodecShared {
                state: Mutex::new(CodecState {
                    phase: CodecPhase::Uninitialized,
                    format: None,
                    surface_input: false,
                    surface_created: false,
                    pending: VecDeque::new(),
                    dequeued: HashMap::new(),
                    next_index: 0,
                    format_reported: false,
                    config_emitted: false,
                    frames_encoded: 0,
                    last_pts_us: 0,
                    input_eos: false,
                    output_eos: false,
                    withhold_eos,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn phase(&self) -> CodecPhase {
        self.shared.state.lock().phase
    }

    pub fn frames_encoded(&self) -> u64 {
        self.shared.state.lock().frames_encoded
    }

    /// Output buffers dequeued but not yet handed back.
    pub fn outstanding_buffers(&self) -> usize {
        self.shared.state.lock().dequeued.len()
    }

    pub fn configured_format(&self) -> Option<MediaFormat> {
        self.shared.state.lock().format.clone()
    }

    pub fn end_of_input_signaled(&self) -> bool {
        self.shared.state.lock().input_eos
    }
}

impl Codec for SoftwareCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&self, format: &MediaFormat) -> Result<(), RecorderError> {
        let mut s = self.shared.state.lock();
        if s.phase != CodecPhase::Uninitialized {
            return Err(RecorderError::CodecError("codec already configured".into()));
        }
        if format.kind != self.kind {
            return Err(RecorderError::ConfigurationFailed(format!(
                "{} cannot encode {} tracks",
                self.name, format.kind
            )));
        }
        match format.kind {
            TrackKind::Video => {
                if format.width == 0 || format.height == 0 {
                    return Err(RecorderError::ConfigurationFailed("video size must be positive".into()));
                }
                if format.bit_rate == 0 || format.frame_rate == 0 {
                    return Err(RecorderError::ConfigurationFailed("bitrate and frame rate required".into()));
                }
            }
            TrackKind::Audio => {
                if format.sample_rate == 0 || format.channel_count == 0 {
                    return Err(RecorderError::ConfigurationFailed("sample rate and channels required".into()));
                }
            }
        }
        s.surface_input = format.color_format == Some(ColorFormat::Surface);
        s.format = Some(format.clone());
        s.phase = CodecPhase::Configured;
        Ok(())
    }

    fn create_input_surface(&self) -> Result<Arc<dyn InputSurface>, RecorderError> {
        let mut s = self.shared.state.lock();
        if s.phase != CodecPhase::Configured {
            return Err(RecorderError::CodecError(
                "input surface can only be created between configure and start".into(),
            ));
        }
        if !s.surface_input {
            return Err(RecorderError::CodecError("codec not configured for surface input".into()));
        }
        s.surface_created = true;
        Ok(Arc::new(SoftwareInputSurface {
            codec: Arc::downgrade(&self.shared),
            kind: self.kind,
            released: AtomicBool::new(false),
        }))
    }

    fn start(&self) -> Result<(), RecorderError> {
        let mut s = self.shared.state.lock();
        if s.phase != CodecPhase::Configured {
            return Err(RecorderError::CodecError("codec not configured".into()));
        }
        s.phase = CodecPhase::Started;
        Ok(())
    }

    fn queue_input(&self, data: &[u8], presentation_time_us: i64, flags: BufferFlags) -> Result<bool, RecorderError> {
        if self.shared.state.lock().surface_input {
            return Err(RecorderError::CodecError("codec takes input from its surface".into()));
        }
        if flags.contains(BufferFlags::END_OF_STREAM) {
            if !data.is_empty() && !self.shared.encode(self.kind, data, presentation_time_us)? {
                return Ok(false);
            }
            let mut s = self.shared.state.lock();
            if s.phase != CodecPhase::Started {
                return Err(RecorderError::CodecError("codec not started".into()));
            }
            s.input_eos = true;
            self.shared.cond.notify_all();
            return Ok(true);
        }
        self.shared.encode(self.kind, data, presentation_time_us)
    }

    fn signal_end_of_input_stream(&self) -> Result<(), RecorderError> {
        let mut s = self.shared.state.lock();
        if !s.surface_input {
            return Err(RecorderError::CodecError("end of input signal requires surface input".into()));
        }
        if s.phase != CodecPhase::Started {
            return Err(RecorderError::CodecError("codec not started".into()));
        }
        s.input_eos = true;
        self.shared.cond.notify_all();
        Ok(())
    }

    fn dequeue_output(&self, timeout: Duration) -> Result<DequeueStatus, RecorderError> {
        let deadline = Instant::now() + timeout;
        let mut s = self.shared.state.lock();
        loop {
            if s.phase != CodecPhase::Started {
                return Err(RecorderError::CodecError("codec not started".into()));
            }
            if !s.pending.is_empty() || (s.input_eos && !s.output_eos && !s.withhold_eos) {
                break;
            }
            if self.shared.cond.wait_until(&mut s, deadline).timed_out() {
                return Ok(DequeueStatus::TryAgainLater);
            }
        }

        if !s.format_reported && !s.pending.is_empty() {
            s.format_reported = true;
            let mut negotiated = s
                .format
                .clone()
                .ok_or_else(|| RecorderError::CodecError("no format configured".into()))?;
            negotiated.csd = match self.kind {
                TrackKind::Video => VIDEO_CSD.to_vec(),
                TrackKind::Audio => AUDIO_CSD.to_vec(),
            };
            return Ok(DequeueStatus::FormatChanged(negotiated));
        }

        let output = match s.pending.pop_front() {
            Some(output) => output,
            None => {
                s.output_eos = true;
                PendingOutput {
                    data: Vec::new(),
                    info: BufferInfo {
                        offset: 0,
                        size: 0,
                        presentation_time_us: s.last_pts_us,
                        flags: BufferFlags::END_OF_STREAM,
                    },
                }
            }
        };
        let index = s.next_index;
        s.next_index += 1;
        let info = output.info;
        s.dequeued.insert(index, output);
        Ok(DequeueStatus::Buffer { index, info })
    }

    fn with_output_buffer(&self, index: usize, f: &mut dyn FnMut(&[u8])) -> Result<(), RecorderError> {
        let s = self.shared.state.lock();
        let output = s
            .dequeued
            .get(&index)
            .ok_or_else(|| RecorderError::CodecError(format!("unknown output buffer {}", index)))?;
        let end = (output.info.offset + output.info.size).min(output.data.len());
        let start = output.info.offset.min(end);
        f(&output.data[start..end]);
        Ok(())
    }

    fn release_output_buffer(&self, index: usize) -> Result<(), RecorderError> {
        let mut s = self.shared.state.lock();
        s.dequeued
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| RecorderError::CodecError(format!("unknown output buffer {}", index)))
    }

    fn stop(&self) -> Result<(), RecorderError> {
        let mut s = self.shared.state.lock();
        match s.phase {
            CodecPhase::Started | CodecPhase::Configured => {
                s.phase = CodecPhase::Stopped;
                s.pending.clear();
                s.dequeued.clear();
                self.shared.cond.notify_all();
                Ok(())
            }
            CodecPhase::Stopped => Ok(()),
            phase => Err(RecorderError::CodecError(format!("cannot stop codec in {:?}", phase))),
        }
    }

    fn release(&self) {
        let mut s = self.shared.state.lock();
        s.phase = CodecPhase::Released;
        s.pending.clear();
        s.dequeued.clear();
        self.shared.cond.notify_all();
    }
}

struct SoftwareInputSurface {
    codec: Weak<CodecShared>,
    kind: TrackKind,
    released: AtomicBool,
}

impl InputSurface for SoftwareInputSurface {
    fn queue_frame(&self, presentation_time_us: i64) -> Result<(), RecorderError> {
        if self.is_released() {
            return Err(RecorderError::CodecError("input surface released".into()));
        }
        let codec = self
            .codec
            .upgrade()
            .ok_or_else(|| RecorderError::CodecError("codec gone".into()))?;
        if !codec.encode(self.kind, &[], presentation_time_us)? {
            log::debug!("software codec: surface frame dropped, output queue full");
        }
        Ok(())
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Provider of [`SoftwareCodec`] instances.
pub struct SoftwareCodecProvider {
    infos: Vec<CodecInfo>,
    withhold_eos: AtomicBool,
    created: Mutex<Vec<Arc<SoftwareCodec>>>,
}

impl Default for SoftwareCodecProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareCodecProvider {
    /// An AVC encoder with surface input and an AAC encoder.
    pub fn new() -> Self {
        Self::with_codecs(vec![
            CodecInfo {
                name: "sw.avc.decoder".into(),
                is_encoder: false,
                supported_types: vec![MIME_VIDEO_AVC.into()],
                color_formats: vec![ColorFormat::Surface],
            },
            CodecInfo {
                name: "sw.avc.encoder".into(),
                is_encoder: true,
                supported_types: vec![MIME_VIDEO_AVC.into()],
                color_formats: vec![ColorFormat::Yuv420Planar, ColorFormat::Surface],
            },
            CodecInfo {
                name: "sw.aac.encoder".into(),
                is_encoder: true,
                supported_types: vec![MIME_AUDIO_AAC.into()],
                color_formats: Vec::new(),
            },
        ])
    }

    pub fn with_codecs(infos: Vec<CodecInfo>) -> Self {
        Self {
            infos,
            withhold_eos: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Codecs created from now on never emit their end-of-stream buffer,
    /// like a hardware encoder that fails to flush.
    pub fn set_withhold_end_of_stream(&self, withhold: bool) {
        self.withhold_eos.store(withhold, Ordering::SeqCst);
    }

    /// Every codec created so far, in creation order.
    pub fn created(&self) -> Vec<Arc<SoftwareCodec>> {
        self.created.lock().clone()
    }

    pub fn created_of(&self, kind: TrackKind) -> Option<Arc<SoftwareCodec>> {
        self.created.lock().iter().rev().find(|c| c.kind() == kind).cloned()
    }
}

impl CodecProvider for SoftwareCodecProvider {
    fn codec_infos(&self) -> Vec<CodecInfo> {
        self.infos.clone()
    }

    fn create_codec(&self, info: &CodecInfo, mime: &str) -> Result<Arc<dyn Codec>, RecorderError> {
        if !info.is_encoder || !info.supports(mime) {
            return Err(RecorderError::CodecNotFound { mime: mime.to_string() });
        }
        let kind = if mime.starts_with("video/") {
            TrackKind::Video
        } else {
            TrackKind::Audio
        };
        let codec = Arc::new(SoftwareCodec::new(&info.name, kind, self.withhold_eos.load(Ordering::SeqCst)));
        self.created.lock().push(Arc::clone(&codec));
        Ok(codec)
    }
}
