use crate::chunk::{ErrorValue, Mode};

/// Errors that can occur while operating a duplex channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// `write` was called after `end`.
    #[error("write after end")]
    WriteAfterEnd,

    /// `push` was called after the readable side reached end-of-stream.
    #[error("push after end of stream")]
    PushAfterEof,

    /// The chunk does not fit the channel's mode.
    #[error("invalid chunk for {mode} channel: {reason}")]
    InvalidChunk { mode: Mode, reason: String },

    /// An `error` event was emitted with nobody observing it.
    ///
    /// Carries the original error unchanged so callers can compare it.
    #[error("unhandled channel error: {0}")]
    Unhandled(ErrorValue),

    /// A pipe destination refused a chunk for a reason of its own.
    #[error("sink rejected chunk: {0}")]
    Rejected(String),

    /// An I/O error occurred while bridging to a reader or writer.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An object chunk could not be serialized for a byte sink.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The underlying writer stopped accepting bytes.
    #[error("sink closed")]
    SinkClosed,

    /// A destination reported backpressure and nothing drained it before
    /// the writer went on.
    #[error("destination stalled: backpressure was never released")]
    Stalled,
}

impl ChannelError {
    /// The original error if this is an unhandled `error` event.
    pub fn unhandled(&self) -> Option<&ErrorValue> {
        match self {
            ChannelError::Unhandled(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
