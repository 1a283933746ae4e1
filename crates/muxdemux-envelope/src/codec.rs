use muxdemux_channel::{Chunk, Mode};
use serde::Deserialize;
use serde_json::Value;

use crate::envelope::{Envelope, WireEnvelope};
use crate::error::{EnvelopeError, Result};

/// Result of inspecting a chunk from the physical channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A valid control envelope.
    Envelope(Envelope),
    /// Anything else. Forwarded untouched.
    Passthrough,
}

impl Decoded {
    pub fn envelope(self) -> Option<Envelope> {
        match self {
            Decoded::Envelope(envelope) => Some(envelope),
            Decoded::Passthrough => None,
        }
    }
}

/// Classify a chunk as an envelope or passthrough data.
///
/// Never fails: malformed envelopes are passthrough.
pub fn try_decode(chunk: &Chunk, mode: Mode) -> Decoded {
    match decode(chunk, mode) {
        Ok(Some(envelope)) => Decoded::Envelope(envelope),
        Ok(None) => Decoded::Passthrough,
        Err(err) => {
            tracing::trace!(error = %err, "envelope-like chunk treated as passthrough");
            Decoded::Passthrough
        }
    }
}

/// Decode a chunk, reporting why an envelope candidate was rejected.
///
/// Returns `Ok(None)` for chunks that are not envelope candidates at all.
pub fn decode(chunk: &Chunk, mode: Mode) -> Result<Option<Envelope>> {
    let wire = match (mode, chunk) {
        (Mode::Bytes, Chunk::Bytes(bytes)) => {
            if !is_candidate(bytes) {
                return Ok(None);
            }
            serde_json::from_slice::<WireEnvelope>(bytes)?
        }
        (Mode::Object, Chunk::Object(value @ Value::Object(map))) => {
            if !map.contains_key("substream") {
                return Ok(None);
            }
            WireEnvelope::deserialize(value)?
        }
        _ => return Ok(None),
    };
    Envelope::from_wire(wire).map(Some)
}

/// Encode an envelope as a chunk for a channel of `mode`.
pub fn encode(envelope: &Envelope, mode: Mode) -> Result<Chunk> {
    envelope.to_chunk(mode)
}

/// A byte chunk may be an envelope only if it is brace-delimited.
fn is_candidate(bytes: &[u8]) -> bool {
    bytes.first() == Some(&b'{') && bytes.last() == Some(&b'}')
}

impl TryFrom<Decoded> for Envelope {
    type Error = EnvelopeError;

    fn try_from(decoded: Decoded) -> Result<Self> {
        decoded
            .envelope()
            .ok_or_else(|| EnvelopeError::Malformed("not an envelope".to_string()))
    }
}
