use thiserror::Error;

/// Errors that can occur while preparing, recording or finalizing a session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("no encoder available for {mime}")]
    CodecNotFound { mime: String },

    #[error("codec error: {0}")]
    CodecError(String),

    #[error("graphics error: {0}")]
    GraphicsError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("timeout")]
    Timeout,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl RecorderError {
    /// Whether the error only affects one track rather than the whole session.
    pub fn is_track_local(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationFailed(_) | Self::CodecNotFound { .. } | Self::CodecError(_) | Self::GraphicsError(_)
        )
    }
}
