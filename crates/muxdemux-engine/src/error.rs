use muxdemux_channel::{ChannelError, ErrorValue};
use muxdemux_envelope::EnvelopeError;

/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Channel-level error, including unhandled substream errors.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Envelope could not be encoded.
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Options could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The substream is finished and cannot be recreated.
    #[error("substream {0:?} is finished")]
    SubstreamFinished(String),

    /// The physical channel has ended.
    #[error("multiplexer is closed")]
    Closed,
}

impl MuxError {
    /// The original error if an `error` event went unobserved.
    pub fn unhandled(&self) -> Option<&ErrorValue> {
        match self {
            MuxError::Channel(err) => err.unhandled(),
            _ => None,
        }
    }
}

impl From<MuxError> for ChannelError {
    fn from(err: MuxError) -> Self {
        match err {
            MuxError::Channel(err) => err,
            MuxError::Envelope(EnvelopeError::Json(err)) | MuxError::Json(err) => {
                ChannelError::Json(err)
            }
            MuxError::Closed => ChannelError::WriteAfterEnd,
            other => ChannelError::Rejected(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
