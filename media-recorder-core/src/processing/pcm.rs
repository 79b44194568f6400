//! Sample format helpers for the audio input path.

/// Remap interleaved samples from `from` channels to `to` channels.
///
/// Down-mixing averages the source channels of each frame; up-mixing
/// duplicates the first source channel. Trailing partial frames are dropped.
pub fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from.max(1) as usize, to.max(1) as usize);
    if from == to {
        return samples[..samples.len() - samples.len() % from].to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to < from {
            let mixed = frame.iter().sum::<f32>() / from as f32;
            out.extend(std::iter::repeat(mixed).take(to));
        } else {
            out.extend(std::iter::repeat(frame[0]).take(to));
        }
    }
    out
}

/// Convert f32 samples `[-1.0, 1.0]` to 16-bit PCM (little-endian bytes).
///
/// Clamps out-of-range values. Output length = `samples.len() * 2` bytes.
pub fn to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}
