use serde::{Deserialize, Serialize};

/// MIME type of H.264 / AVC video.
pub const MIME_VIDEO_AVC: &str = "video/avc";

/// MIME type of AAC audio in LATM framing.
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";

/// Kind of elementary stream carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        match self {
            Self::Audio => 0,
            Self::Video => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Audio),
            1 => Some(Self::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Portable pixel format tags a video codec may report for its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorFormat {
    /// Input arrives through a codec-owned graphics surface.
    Surface,
    Yuv420Planar,
    Yuv420SemiPlanar,
}

/// Color formats the video encoder can feed. Frames are only ever delivered
/// through the codec input surface.
pub const RECOGNIZED_COLOR_FORMATS: &[ColorFormat] = &[ColorFormat::Surface];

/// Returns the first color format in `supported` that the encoder can feed.
pub fn select_color_format(supported: &[ColorFormat]) -> Option<ColorFormat> {
    supported
        .iter()
        .copied()
        .find(|format| RECOGNIZED_COLOR_FORMATS.contains(format))
}

/// Description of an elementary stream, both the requested encoder
/// configuration and the format negotiated by the codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub mime: String,
    pub kind: TrackKind,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub i_frame_interval_secs: u32,
    pub color_format: Option<ColorFormat>,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bit_rate: u32,
    /// Codec-specific data (e.g. SPS/PPS, AudioSpecificConfig).
    #[serde(default)]
    pub csd: Vec<u8>,
}

impl MediaFormat {
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        Self {
            mime: mime.to_string(),
            kind: TrackKind::Video,
            width,
            height,
            frame_rate: 0,
            i_frame_interval_secs: 0,
            color_format: None,
            sample_rate: 0,
            channel_count: 0,
            bit_rate: 0,
            csd: Vec::new(),
        }
    }

    pub fn audio(mime: &str, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            mime: mime.to_string(),
            kind: TrackKind::Audio,
            width: 0,
            height: 0,
            frame_rate: 0,
            i_frame_interval_secs: 0,
            color_format: None,
            sample_rate,
            channel_count,
            bit_rate: 0,
            csd: Vec::new(),
        }
    }
}

/// Flags attached to codec input and output buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferFlags(pub u32);

impl BufferFlags {
    pub const NONE: Self = Self(0);
    pub const KEY_FRAME: Self = Self(1);
    pub const CODEC_CONFIG: Self = Self(2);
    pub const END_OF_STREAM: Self = Self(4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for BufferFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Metadata of one compressed output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}
