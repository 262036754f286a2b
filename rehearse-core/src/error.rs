use thiserror::Error;

/// All errors produced by rehearse-core.
#[derive(Debug, Error)]
pub enum RehearseError {
    /// Microphone permission denied, device busy, or no input device at all.
    #[error("capture device unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("output audio context unavailable: {0}")]
    OutputUnavailable(String),

    /// The duplex channel could not be established.
    #[error("channel open failed: {0}")]
    ChannelOpen(String),

    /// Error reported by the remote side after the channel was open.
    #[error("channel error: {0}")]
    ChannelRuntime(String),

    /// Malformed inbound audio payload.
    #[error("audio payload decode failed: {0}")]
    Decode(String),

    #[error("a session is already active")]
    SessionActive,

    /// The session was ended while it was still connecting.
    #[error("session ended before the channel opened")]
    Aborted,

    #[error("feedback generation failed: {0}")]
    Feedback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RehearseError>;
