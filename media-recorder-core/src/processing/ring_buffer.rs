/// Circular staging buffer for interleaved PCM awaiting the audio codec.
///
/// Tracks the presentation time of its oldest sample so whole codec frames
/// can be cut out with the right timestamp. Wrap in `parking_lot::Mutex`
/// for cross-thread access.
///
/// Overflow behavior: drops the oldest frames and advances the head
/// timestamp accordingly.
#[derive(Debug)]
pub struct PcmRingBuffer {
    buffer: Vec<f32>,
    write_index: usize,
    read_index: usize,
    available: usize,
    channels: usize,
    sample_rate: u32,
    head_pts_us: i64,
}

impl PcmRingBuffer {
    /// `capacity_frames` frames of `channels` interleaved samples each.
    pub fn new(capacity_frames: usize, channels: u16, sample_rate: u32) -> Self {
        let channels = channels.max(1) as usize;
        Self {
            buffer: vec![0.0; capacity_frames.max(1) * channels],
            write_index: 0,
            read_index: 0,
            available: 0,
            channels,
            sample_rate: sample_rate.max(1),
            head_pts_us: 0,
        }
    }

    fn frames_to_us(&self, frames: usize) -> i64 {
        frames as i64 * 1_000_000 / self.sample_rate as i64
    }

    /// Append interleaved samples whose first frame is presented at
    /// `presentation_time_us`. A trailing partial frame is ignored.
    pub fn write(&mut self, samples: &[f32], presentation_time_us: i64) {
        let whole = samples.len() - samples.len() % self.channels;
        let mut samples = &samples[..whole];
        if samples.is_empty() {
            return;
        }
        let capacity = self.buffer.len();
        let mut pts = presentation_time_us;

        if samples.len() > capacity {
            let skipped = samples.len() - capacity;
            pts += self.frames_to_us(skipped / self.channels);
            samples = &samples[skipped..];
        }

        if self.available == 0 {
            self.head_pts_us = pts;
        }

        let overflow = (self.available + samples.len()).saturating_sub(capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % capacity;
            self.available -= overflow;
            self.head_pts_us = if self.available == 0 {
                pts
            } else {
                self.head_pts_us + self.frames_to_us(overflow / self.channels)
            };
        }

        for &sample in samples {
            self.buffer[self.write_index] = sample;
            self.write_index = (self.write_index + 1) % capacity;
        }
        self.available += samples.len();
    }

    /// Remove exactly `frames` frames, or nothing if fewer are staged.
    /// Returns the samples and the timestamp of their first frame.
    pub fn take_frames(&mut self, frames: usize) -> Option<(Vec<f32>, i64)> {
        let count = frames * self.channels;
        if count == 0 || count > self.available {
            return None;
        }
        let capacity = self.buffer.len();
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(self.buffer[(self.read_index + i) % capacity]);
        }
        let pts = self.head_pts_us;
        self.read_index = (self.read_index + count) % capacity;
        self.available -= count;
        self.head_pts_us += self.frames_to_us(frames);
        Some((out, pts))
    }

    /// Remove whatever is left, if anything.
    pub fn take_remaining(&mut self) -> Option<(Vec<f32>, i64)> {
        let frames = self.available / self.channels;
        self.take_frames(frames)
    }

    /// Number of whole frames staged.
    pub fn frames(&self) -> usize {
        self.available / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
        self.head_pts_us = 0;
    }
}
