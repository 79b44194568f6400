use std::path::PathBuf;
use std::time::Duration;

use super::media_format::{MIME_AUDIO_AAC, MIME_VIDEO_AVC};
use crate::render::matrix::Transform;

/// Highest accepted audio sample rate in Hz.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Compute the target video bitrate: `bpp × frame_rate × width × height`.
pub fn calc_bit_rate(bits_per_pixel: f64, frame_rate: u32, width: u32, height: u32) -> u32 {
    let bitrate = bits_per_pixel * frame_rate as f64 * width as f64 * height as f64;
    log::info!("bitrate={:5.2}[Mbps]", bitrate / 1024.0 / 1024.0);
    bitrate as u32
}

/// Video track settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    /// Compression format (default: `video/avc`).
    pub mime: String,

    /// Explicit encoded size, or None to follow the upstream viewport.
    pub size: Option<(u32, u32)>,

    /// Target frame rate (default: 25).
    pub frame_rate: u32,

    /// Bits-per-pixel factor of the bitrate formula (default: 0.25).
    pub bits_per_pixel: f64,

    /// Keyframe interval in seconds (default: 10).
    pub i_frame_interval_secs: u32,
}

impl VideoEncoderConfig {
    pub fn bit_rate(&self, width: u32, height: u32) -> u32 {
        calc_bit_rate(self.bits_per_pixel, self.frame_rate, width, height)
    }

    /// Frame interval in microseconds.
    pub fn frame_interval_us(&self) -> i64 {
        1_000_000 / self.frame_rate.max(1) as i64
    }
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            mime: MIME_VIDEO_AVC.to_string(),
            size: None,
            frame_rate: 25,
            bits_per_pixel: 0.25,
            i_frame_interval_secs: 10,
        }
    }
}

/// Audio track settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderConfig {
    /// Compression format (default: `audio/mp4a-latm`).
    pub mime: String,

    /// Sample rate in Hz (default: 44100).
    pub sample_rate: u32,

    /// Channel count, 1 or 2 (default: 1).
    pub channels: u16,

    /// Target bitrate in bits/sec (default: 64000).
    pub bit_rate: u32,

    /// Frames per channel handed to the codec in one input buffer (default: 1024).
    pub samples_per_frame: usize,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: 44100,
            channels: 1,
            bit_rate: 64000,
            samples_per_frame: 1024,
        }
    }
}

/// Tunables of the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSettings {
    /// Timeout of a single dequeue-output poll.
    pub poll_timeout: Duration,

    /// Consecutive empty polls before a regular drain yields.
    pub idle_polls_before_yield: u32,

    /// Consecutive empty polls tolerated while waiting for the codec's
    /// end-of-stream buffer before giving up.
    pub eos_stall_budget: u32,

    /// Bounded wait slice while blocked on the muxer start barrier.
    pub muxer_start_wait: Duration,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            idle_polls_before_yield: 5,
            eos_stall_budget: 10,
            muxer_start_wait: Duration::from_millis(100),
        }
    }
}

/// Tunables of the render worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Bounded wait while no redraw is pending.
    pub wait_timeout: Duration,

    /// Transform applied when redrawing into the encoder surface.
    pub transform: Transform,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(10),
            transform: Transform::default(),
        }
    }
}

/// Configuration for a recording session.
#[derive(Debug, Clone)]
pub struct RecorderConfiguration {
    /// Directory where container files are written.
    pub output_directory: PathBuf,

    /// File name prefix of the container (default: "recording").
    pub file_prefix: String,

    /// Video track, or None to record audio only.
    pub video: Option<VideoEncoderConfig>,

    /// Audio track, or None to record video only.
    pub audio: Option<AudioEncoderConfig>,

    pub drain: DrainSettings,

    pub render: RenderSettings,

    /// Write a `<file>.metadata.json` sidecar when the recording completes.
    pub write_metadata: bool,
}

impl RecorderConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.video.is_none() && self.audio.is_none() {
            return Err("at least one track must be enabled".into());
        }
        if self.file_prefix.is_empty() {
            return Err("file prefix must not be empty".into());
        }
        if let Some(video) = &self.video {
            if video.mime.is_empty() {
                return Err("video mime type must not be empty".into());
            }
            if video.frame_rate == 0 {
                return Err("frame rate must be positive".into());
            }
            if video.bits_per_pixel <= 0.0 {
                return Err("bits per pixel must be positive".into());
            }
            if let Some((width, height)) = video.size {
                if width == 0 || height == 0 {
                    return Err(format!("invalid video size: {}x{}", width, height));
                }
                if width % 2 != 0 || height % 2 != 0 {
                    return Err(format!("video size must be even: {}x{}", width, height));
                }
            }
        }
        if let Some(audio) = &self.audio {
            if audio.mime.is_empty() {
                return Err("audio mime type must not be empty".into());
            }
            if audio.sample_rate == 0 {
                return Err("sample rate must be positive".into());
            }
            if audio.sample_rate > MAX_SAMPLE_RATE {
                return Err(format!("sample rate {} exceeds {}", audio.sample_rate, MAX_SAMPLE_RATE));
            }
            if ![1, 2].contains(&audio.channels) {
                return Err(format!("unsupported channel count: {}", audio.channels));
            }
            if audio.samples_per_frame == 0 {
                return Err("samples per frame must be positive".into());
            }
        }
        if self.drain.eos_stall_budget == 0 {
            return Err("end-of-stream stall budget must be positive".into());
        }
        Ok(())
    }
}

impl Default for RecorderConfiguration {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("."),
            file_prefix: "recording".into(),
            video: Some(VideoEncoderConfig::default()),
            audio: Some(AudioEncoderConfig::default()),
            drain: DrainSettings::default(),
            render: RenderSettings::default(),
            write_metadata: true,
        }
    }
}
