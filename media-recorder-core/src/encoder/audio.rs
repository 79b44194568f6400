use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::track::{TrackEncoder, TrackSource};
use crate::models::config::AudioEncoderConfig;
use crate::models::error::RecorderError;
use crate::models::media_format::{BufferFlags, MediaFormat, TrackKind};
use crate::processing::pcm;
use crate::processing::ring_buffer::PcmRingBuffer;
use crate::traits::codec::Codec;

/// Seconds of audio the staging buffer holds before dropping the oldest.
const STAGING_SECONDS: usize = 2;

/// Feeds an audio codec with PCM buffers.
///
/// The staging buffer is shared with every [`AudioInput`] bound to the
/// track, so a partial frame still staged at end of stream is flushed to
/// the codec ahead of the EOS buffer.
pub struct AudioSource {
    config: AudioEncoderConfig,
    staging: Arc<Mutex<PcmRingBuffer>>,
}

impl AudioSource {
    pub fn new(config: AudioEncoderConfig) -> Self {
        let capacity = (config.sample_rate as usize).saturating_mul(STAGING_SECONDS);
        let staging = PcmRingBuffer::new(capacity, config.channels, config.sample_rate);
        Self {
            config,
            staging: Arc::new(Mutex::new(staging)),
        }
    }

    /// Staging buffer to hand to [`AudioInput::new`]. Take it before the
    /// source is moved into its encoder.
    pub(crate) fn staging(&self) -> Arc<Mutex<PcmRingBuffer>> {
        Arc::clone(&self.staging)
    }
}

impl TrackSource for AudioSource {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn output_format(&self) -> MediaFormat {
        let mut format = MediaFormat::audio(&self.config.mime, self.config.sample_rate, self.config.channels);
        format.bit_rate = self.config.bit_rate;
        format
    }

    fn signal_end_of_stream(&self, codec: &dyn Codec, last_pts_us: i64) -> Result<(), RecorderError> {
        let mut eos_pts_us = last_pts_us;
        let remainder = self.staging.lock().take_remaining();
        if let Some((frame, pts)) = remainder {
            log::debug!("audio: flushing {} staged frames at {}us", frame.len() / self.config.channels as usize, pts);
            if codec.queue_input(&pcm::to_pcm16_le(&frame), pts, BufferFlags::NONE)? {
                eos_pts_us = eos_pts_us.max(pts);
            } else {
                log::warn!("audio: codec busy, dropped final partial frame at {}us", pts);
            }
        }
        if !codec.queue_input(&[], eos_pts_us, BufferFlags::END_OF_STREAM)? {
            return Err(RecorderError::CodecError("no input slot for end of stream".into()));
        }
        Ok(())
    }
}

struct AudioInputShared {
    encoder: Weak<TrackEncoder>,
    channels: u16,
    samples_per_frame: usize,
    staging: Arc<Mutex<PcmRingBuffer>>,
}

/// Handle the caller pushes captured PCM into.
///
/// Samples are remapped to the track's channel count, staged, cut into
/// codec frames of `samples_per_frame` frames each and queued as 16-bit PCM.
/// Input arriving while the track is not capturing is dropped.
#[derive(Clone)]
pub struct AudioInput {
    shared: Arc<AudioInputShared>,
}

impl AudioInput {
    pub(crate) fn new(
        encoder: &Arc<TrackEncoder>,
        staging: Arc<Mutex<PcmRingBuffer>>,
        config: &AudioEncoderConfig,
    ) -> Self {
        Self {
            shared: Arc::new(AudioInputShared {
                encoder: Arc::downgrade(encoder),
                channels: config.channels,
                samples_per_frame: config.samples_per_frame,
                staging,
            }),
        }
    }

    /// Push interleaved f32 samples with `channels` channels whose first
    /// frame is presented at `presentation_time_us`. Returns the number of
    /// codec frames queued.
    pub fn push(&self, samples: &[f32], channels: u16, presentation_time_us: i64) -> usize {
        let Some(encoder) = self.shared.encoder.upgrade() else {
            return 0;
        };
        if !encoder.is_capturing() {
            log::debug!("audio input: not capturing, dropping {} samples", samples.len());
            return 0;
        }

        let samples = pcm::remap_channels(samples, channels, self.shared.channels);
        let mut staging = self.shared.staging.lock();
        staging.write(&samples, presentation_time_us);

        let mut queued = 0;
        while let Some((frame, pts)) = staging.take_frames(self.shared.samples_per_frame) {
            match encoder.queue_input(&pcm::to_pcm16_le(&frame), pts) {
                Ok(true) => queued += 1,
                Ok(false) => log::warn!("audio input: codec busy, dropped frame at {}us", pts),
                Err(e) => {
                    log::warn!("audio input: queue failed: {}", e);
                    staging.reset();
                    break;
                }
            }
        }
        queued
    }

    /// Frames staged but not yet handed to the codec.
    pub fn staged_frames(&self) -> usize {
        self.shared.staging.lock().frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareCodecProvider;
    use crate::models::config::DrainSettings;
    use crate::muxer::coordinator::MuxerCoordinator;
    use crate::storage::container_file::MrecFormat;

    fn audio_encoder(config: &AudioEncoderConfig) -> (Arc<TrackEncoder>, AudioInput) {
        let dir = std::env::temp_dir().join(format!("media_recorder_audio_{}", std::process::id()));
        let muxer = Arc::new(MuxerCoordinator::new(Arc::new(MrecFormat), &dir, "audio"));
        let source = AudioSource::new(config.clone());
        let staging = source.staging();
        let encoder = TrackEncoder::new(Box::new(source), muxer, None, DrainSettings::default());
        let input = AudioInput::new(&encoder, staging, config);
        (encoder, input)
    }

    #[test]
    fn format_carries_configured_values() {
        let config = AudioEncoderConfig {
            channels: 2,
            ..Default::default()
        };
        let format = AudioSource::new(config).output_format();
        assert_eq!(format.sample_rate, 44100);
        assert_eq!(format.channel_count, 2);
        assert_eq!(format.bit_rate, 64000);
    }

    #[test]
    fn input_is_dropped_unless_capturing() {
        let config = AudioEncoderConfig::default();
        let (encoder, input) = audio_encoder(&config);
        encoder.prepare(&SoftwareCodecProvider::new()).unwrap();

        assert_eq!(input.push(&[0.5; 2048], 1, 0), 0);
        assert_eq!(input.staged_frames(), 0);
        encoder.release();
    }

    #[test]
    fn pushes_are_cut_into_codec_frames() {
        let config = AudioEncoderConfig::default();
        let (encoder, input) = audio_encoder(&config);
        let provider = SoftwareCodecProvider::new();
        encoder.prepare(&provider).unwrap();
        encoder.start_recording().unwrap();

        // Stereo in, mono track: 1536 frames make one codec frame plus a remainder.
        assert_eq!(input.push(&[0.25; 3072], 2, 0), 1);
        assert_eq!(input.staged_frames(), 512);
        assert_eq!(input.push(&[0.25; 1024], 2, 34_830), 1);
        assert_eq!(input.staged_frames(), 0);

        let codec = provider.created_of(TrackKind::Audio).unwrap();
        assert_eq!(codec.frames_encoded(), 2);

        encoder.stop_recording();
        encoder.join();
        assert_eq!(input.push(&[0.25; 2048], 1, 100_000), 0);
    }

    #[test]
    fn partial_frame_is_flushed_before_end_of_stream() {
        let config = AudioEncoderConfig::default();
        let (encoder, input) = audio_encoder(&config);
        let provider = SoftwareCodecProvider::new();
        encoder.prepare(&provider).unwrap();
        encoder.start_recording().unwrap();

        assert_eq!(input.push(&[0.25; 1536], 1, 0), 1);
        assert_eq!(input.staged_frames(), 512);

        encoder.stop_recording();
        encoder.join();
        let codec = provider.created_of(TrackKind::Audio).unwrap();
        assert_eq!(codec.frames_encoded(), 2);
        assert!(codec.end_of_input_signaled());
        assert_eq!(input.staged_frames(), 0);
    }

    #[test]
    fn dropped_encoder_makes_input_inert() {
        let config = AudioEncoderConfig::default();
        let (encoder, input) = audio_encoder(&config);
        drop(encoder);
        assert_eq!(input.push(&[0.0; 1024], 1, 0), 0);
    }
}
