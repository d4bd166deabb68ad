//! Error types for the debate session.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebateError {
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("protocol violation: expected {expected}, received {actual}")]
    Protocol { expected: String, actual: String },

    #[error("payload decode error: {0}")]
    PayloadDecode(String),

    #[error("timed out after {0:?} waiting for the peer")]
    Timeout(Duration),

    #[error("model invocation failed: {0}")]
    ModelInvocation(#[from] async_openai::error::OpenAIError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TTS error: {0}")]
    Tts(String),
}

impl DebateError {
    /// Transport error for a peer that went away mid-exchange, where no
    /// live `std::io::Error` exists to wrap.
    pub fn peer_closed() -> Self {
        DebateError::Transport(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "peer closed the connection",
        ))
    }
}
