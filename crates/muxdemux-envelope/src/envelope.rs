use muxdemux_channel::{Arg, Chunk, Mode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EnvelopeError, Result};
use crate::method::Method;
use crate::tags::{tag, untag};

/// An operation replayed on the receiving side's mirror substream.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Write one chunk.
    Write(Arg),
    /// Emit a named event.
    Emit { event: String, args: Vec<Arg> },
    /// End, optionally writing a final chunk first.
    End(Option<Arg>),
}

impl Operation {
    /// Write operation for a chunk.
    pub fn write(chunk: Chunk) -> Self {
        Operation::Write(chunk.into_arg())
    }

    /// Emit operation for `event`.
    pub fn emit(event: impl Into<String>, args: Vec<Arg>) -> Self {
        Operation::Emit {
            event: event.into(),
            args,
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Operation::Write(_) => Method::Write,
            Operation::Emit { .. } => Method::Emit,
            Operation::End(_) => Method::End,
        }
    }

    fn to_wire_args(&self) -> Vec<Value> {
        match self {
            Operation::Write(arg) => vec![tag(arg)],
            Operation::Emit { event, args } => std::iter::once(Value::String(event.clone()))
                .chain(args.iter().map(tag))
                .collect(),
            Operation::End(arg) => arg.iter().map(tag).collect(),
        }
    }

    fn from_wire(method: Method, args: Vec<Value>) -> Result<Self> {
        let mut args = args.into_iter();
        match method {
            Method::Write => match (args.next(), args.next()) {
                (Some(arg), None) => Ok(Operation::Write(untag(arg))),
                _ => Err(EnvelopeError::Malformed(
                    "write takes exactly one argument".to_string(),
                )),
            },
            Method::Emit => match args.next() {
                Some(Value::String(event)) => Ok(Operation::Emit {
                    event,
                    args: args.map(untag).collect(),
                }),
                _ => Err(EnvelopeError::Malformed(
                    "emit needs an event name".to_string(),
                )),
            },
            Method::End => match (args.next(), args.next()) {
                (arg, None) => Ok(Operation::End(arg.map(untag))),
                _ => Err(EnvelopeError::Malformed(
                    "end takes at most one argument".to_string(),
                )),
            },
        }
    }
}

/// A control message addressed to a named substream.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Target substream name. Never empty.
    pub substream: String,
    /// Set only on the announcement of a new substream.
    pub new: bool,
    /// The operation to replay, if any.
    pub operation: Option<Operation>,
    /// Id of the multiplexer that produced this envelope.
    pub source: Option<String>,
}

impl Envelope {
    /// Announce a newly created substream.
    pub fn announce(substream: impl Into<String>) -> Self {
        Self {
            substream: substream.into(),
            new: true,
            operation: None,
            source: None,
        }
    }

    /// Carry an operation for a substream.
    pub fn operation(substream: impl Into<String>, operation: Operation) -> Self {
        Self {
            substream: substream.into(),
            new: false,
            operation: Some(operation),
            source: None,
        }
    }

    /// Stamp the originating multiplexer id.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn method(&self) -> Option<Method> {
        self.operation.as_ref().map(Operation::method)
    }

    /// Returns true if this envelope was produced by multiplexer `id`.
    pub fn is_from(&self, id: &str) -> bool {
        self.source.as_deref() == Some(id)
    }

    /// Serialize into a chunk for a channel of `mode`.
    pub fn to_chunk(&self, mode: Mode) -> Result<Chunk> {
        let wire = WireEnvelope::from(self);
        match mode {
            Mode::Bytes => Ok(Chunk::from(serde_json::to_vec(&wire)?)),
            Mode::Object => Ok(Chunk::Object(serde_json::to_value(&wire)?)),
        }
    }

    pub(crate) fn from_wire(wire: WireEnvelope) -> Result<Self> {
        if wire.substream.is_empty() {
            return Err(EnvelopeError::Malformed(
                "substream name is empty".to_string(),
            ));
        }
        let operation = match wire.method {
            Some(name) => {
                let method = Method::from_name(&name).ok_or_else(|| {
                    EnvelopeError::Malformed(format!("unknown method {name:?}"))
                })?;
                Some(Operation::from_wire(
                    method,
                    wire.args.unwrap_or_default(),
                )?)
            }
            None => None,
        };
        Ok(Self {
            substream: wire.substream,
            new: wire.new,
            operation,
            source: wire.source,
        })
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Field layout on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireEnvelope {
    pub substream: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        Self {
            substream: envelope.substream.clone(),
            new: envelope.new,
            method: envelope.method().map(|m| m.as_str().to_string()),
            args: envelope.operation.as_ref().map(Operation::to_wire_args),
            source: envelope.source.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use muxdemux_channel::ErrorValue;
    use serde_json::json;

    use super::*;

    #[test]
    fn announce_omits_operation_fields() {
        let chunk = Envelope::announce("foo").to_chunk(Mode::Object).unwrap();
        assert_eq!(chunk, Chunk::Object(json!({ "substream": "foo", "new": true })));
    }

    #[test]
    fn write_tags_bytes() {
        let envelope = Envelope::operation("foo", Operation::write(Chunk::from("uno")))
            .with_source("mux-1");
        let chunk = envelope.to_chunk(Mode::Object).unwrap();
        assert_eq!(
            chunk,
            Chunk::Object(json!({
                "substream": "foo",
                "method": "write",
                "args": [{ "type": "Buffer", "data": [117, 110, 111] }],
                "source": "mux-1"
            }))
        );
    }

    #[test]
    fn emit_puts_event_name_first() {
        let err = ErrorValue::with_stack("boom", None);
        let op = Operation::emit("error", vec![Arg::Error(err)]);
        let wire = WireEnvelope::from(&Envelope::operation("foo", op));
        assert_eq!(
            wire.args.unwrap(),
            vec![json!("error"), json!({ "type": "Error", "message": "boom" })]
        );
    }

    #[test]
    fn end_without_chunk_has_empty_args() {
        let wire = WireEnvelope::from(&Envelope::operation("foo", Operation::End(None)));
        assert_eq!(wire.method.as_deref(), Some("end"));
        assert_eq!(wire.args, Some(vec![]));
    }

    #[test]
    fn write_requires_exactly_one_argument() {
        let wire = WireEnvelope {
            substream: "foo".to_string(),
            new: false,
            method: Some("write".to_string()),
            args: Some(vec![json!(1), json!(2)]),
            source: None,
        };
        assert!(matches!(
            Envelope::from_wire(wire),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn emit_requires_string_event() {
        let wire = WireEnvelope {
            substream: "foo".to_string(),
            new: false,
            method: Some("emit".to_string()),
            args: Some(vec![json!(42)]),
            source: None,
        };
        assert!(matches!(
            Envelope::from_wire(wire),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_method_rejected() {
        let wire = WireEnvelope {
            substream: "foo".to_string(),
            new: false,
            method: Some("destroy".to_string()),
            args: None,
            source: None,
        };
        assert!(Envelope::from_wire(wire).is_err());
    }

    #[test]
    fn from_wire_untags_arguments() {
        let wire = WireEnvelope {
            substream: "foo".to_string(),
            new: false,
            method: Some("end".to_string()),
            args: Some(vec![json!({ "type": "Buffer", "data": [104, 105] })]),
            source: Some("peer".to_string()),
        };
        let envelope = Envelope::from_wire(wire).unwrap();
        assert_eq!(
            envelope.operation,
            Some(Operation::End(Some(Arg::Bytes(Bytes::from_static(b"hi")))))
        );
        assert!(envelope.is_from("peer"));
        assert!(!envelope.is_from("other"));
    }
}
