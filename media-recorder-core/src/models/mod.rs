pub mod config;
pub mod error;
pub mod media_format;
pub mod recording_result;
pub mod state;
