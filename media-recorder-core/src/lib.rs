//! # media-recorder-core
//!
//! Real-time capture → encode → mux pipeline.
//!
//! An upstream renderer draws into an offscreen texture; a render worker
//! redraws that texture into a video codec's input surface while PCM pushed
//! by the caller feeds an audio codec. One drain thread per track forwards
//! compressed output to a multiplexer that starts writing only once every
//! track has negotiated its format.
//!
//! Platform codecs, GPU contexts and container formats plug in through the
//! traits in [`traits`]; [`backend`] and [`storage`] carry working
//! implementations that need neither hardware nor a display.
//!
//! ## Architecture
//!
//! ```text
//! media-recorder-core (this crate)
//! ├── traits/       ← Codec, CodecProvider, ContainerWriter, GlApi, SharedContext, RecorderListener
//! ├── models/       ← RecorderError, SessionState, RecorderConfiguration, MediaFormat, RecordingResult
//! ├── render/       ← OffscreenRenderer, EncodeRenderStage, RenderWorker
//! ├── encoder/      ← TrackEncoder with video and audio sources, AudioInput
//! ├── muxer/        ← MuxerCoordinator (start barrier)
//! ├── session/      ← RecordingSession (façade)
//! ├── processing/   ← PcmRingBuffer, PCM conversion
//! ├── storage/      ← .mrec container writer/reader, metadata sidecar
//! └── backend/      ← headless GL, software codecs
//! ```

pub mod backend;
pub mod encoder;
pub mod models;
pub mod muxer;
pub mod processing;
pub mod render;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backend::headless::HeadlessContext;
pub use backend::software::SoftwareCodecProvider;
pub use encoder::audio::AudioInput;
pub use encoder::track::TrackEncoder;
pub use models::config::{AudioEncoderConfig, DrainSettings, RecorderConfiguration, RenderSettings, VideoEncoderConfig};
pub use models::error::RecorderError;
pub use models::media_format::{BufferFlags, BufferInfo, MediaFormat, TrackKind};
pub use models::recording_result::{RecordingMetadata, RecordingResult, TrackSummary};
pub use models::state::SessionState;
pub use muxer::coordinator::MuxerCoordinator;
pub use render::matrix::Transform;
pub use render::offscreen::{FrameSource, OffscreenRenderer};
pub use render::worker::RenderWorker;
pub use session::recording::RecordingSession;
pub use storage::container_file::{read_container, MrecFormat};
pub use traits::codec::{Codec, CodecInfo, CodecProvider};
pub use traits::container::{ContainerFormat, ContainerWriter};
pub use traits::graphics::{GlApi, Renderer, SharedContext};
pub use traits::listener::RecorderListener;
