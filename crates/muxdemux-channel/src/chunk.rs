use std::fmt;
use std::panic::Location;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChannelError, Result};

/// Default high-water mark for byte-mode channels: 16 KiB.
pub const DEFAULT_HIGH_WATER_MARK_BYTES: usize = 16 * 1024;

/// Default high-water mark for object-mode channels: 16 chunks.
pub const DEFAULT_HIGH_WATER_MARK_OBJECTS: usize = 16;

/// What a channel carries. Fixed for the channel's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Opaque byte chunks.
    Bytes,
    /// Structured JSON values (and, for passthrough, raw bytes).
    Object,
}

impl Mode {
    /// Default backpressure threshold for this mode.
    pub fn default_high_water_mark(self) -> usize {
        match self {
            Mode::Bytes => DEFAULT_HIGH_WATER_MARK_BYTES,
            Mode::Object => DEFAULT_HIGH_WATER_MARK_OBJECTS,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Bytes => f.write_str("byte-mode"),
            Mode::Object => f.write_str("object-mode"),
        }
    }
}

/// A unit of data moving through a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Bytes(Bytes),
    Object(Value),
}

impl Chunk {
    /// Borrow the bytes of a byte chunk.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Chunk::Bytes(bytes) => Some(bytes),
            Chunk::Object(_) => None,
        }
    }

    /// Borrow the value of an object chunk.
    pub fn as_object(&self) -> Option<&Value> {
        match self {
            Chunk::Object(value) => Some(value),
            Chunk::Bytes(_) => None,
        }
    }

    /// Reject chunks a channel of `mode` cannot carry.
    pub fn check(&self, mode: Mode) -> Result<()> {
        match (mode, self) {
            (Mode::Bytes, Chunk::Object(_)) => Err(ChannelError::InvalidChunk {
                mode,
                reason: "object chunks need an object-mode channel".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// How much this chunk counts against a high-water mark.
    pub fn weight(&self, mode: Mode) -> usize {
        match (mode, self) {
            (Mode::Bytes, Chunk::Bytes(bytes)) => bytes.len(),
            _ => 1,
        }
    }

    /// The argument form of this chunk, as carried by a `write` operation.
    pub fn into_arg(self) -> Arg {
        match self {
            Chunk::Bytes(bytes) => Arg::Bytes(bytes),
            Chunk::Object(value) => Arg::Value(value),
        }
    }

    /// Rebuild a chunk from a replayed argument.
    ///
    /// Strings are accepted as bytes in byte mode.
    pub fn from_arg(arg: Arg, mode: Mode) -> Result<Self> {
        match (mode, arg) {
            (_, Arg::Bytes(bytes)) => Ok(Chunk::Bytes(bytes)),
            (Mode::Object, Arg::Value(value)) => Ok(Chunk::Object(value)),
            (Mode::Bytes, Arg::Value(Value::String(text))) => {
                Ok(Chunk::Bytes(Bytes::from(text.into_bytes())))
            }
            (Mode::Bytes, Arg::Value(other)) => Err(ChannelError::InvalidChunk {
                mode,
                reason: format!("expected bytes or string, got {other}"),
            }),
            (_, Arg::Error(err)) => Err(ChannelError::InvalidChunk {
                mode,
                reason: format!("error values are not data: {err}"),
            }),
        }
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Chunk {
    fn from(bytes: &[u8]) -> Self {
        Chunk::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Chunk::Bytes(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::Bytes(Bytes::from(text.into_bytes()))
    }
}

impl From<Value> for Chunk {
    fn from(value: Value) -> Self {
        Chunk::Object(value)
    }
}

/// One argument of a substream operation (`write`, `emit`, `end`).
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Bytes(Bytes),
    Error(ErrorValue),
}

impl Arg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Value(Value::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Arg::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorValue> {
        match self {
            Arg::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Arg::Value(Value::String(text.to_string()))
    }
}

impl From<Bytes> for Arg {
    fn from(bytes: Bytes) -> Self {
        Arg::Bytes(bytes)
    }
}

impl From<ErrorValue> for Arg {
    fn from(err: ErrorValue) -> Self {
        Arg::Error(err)
    }
}

/// An error raised on a channel.
///
/// Keeps the message and a stack-like trace so it survives a trip across
/// the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ErrorValue {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorValue {
    /// Create an error whose trace points at the caller.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let location = Location::caller();
        let stack = format!(
            "Error: {message}\n    at {}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        );
        Self {
            message,
            stack: Some(stack),
        }
    }

    /// Create an error with an explicit (possibly absent) trace.
    pub fn with_stack(message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            message: message.into(),
            stack,
        }
    }

    /// Capture any error's display text.
    #[track_caller]
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        Self::new(err.to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}
