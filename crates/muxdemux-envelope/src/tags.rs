//! Reversible JSON forms for operation arguments that are not plain JSON.
//!
//! Byte sequences travel as `{"type":"Buffer","data":[..]}` and errors as
//! `{"type":"Error","message":..,"stack":..}`. Every other value is carried
//! as-is.

use bytes::Bytes;
use muxdemux_channel::{Arg, ErrorValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Tagged {
    Buffer {
        data: Vec<u8>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

/// JSON form of an argument.
pub fn tag(arg: &Arg) -> Value {
    let tagged = match arg {
        Arg::Value(value) => return value.clone(),
        Arg::Bytes(bytes) => Tagged::Buffer {
            data: bytes.to_vec(),
        },
        Arg::Error(err) => Tagged::Error {
            message: err.message.clone(),
            stack: err.stack.clone(),
        },
    };
    serde_json::to_value(tagged).unwrap_or(Value::Null)
}

/// Argument from its JSON form. Values that are not a well-formed tag are
/// returned unchanged.
pub fn untag(value: Value) -> Arg {
    let is_tag = matches!(
        value.get("type").and_then(Value::as_str),
        Some("Buffer" | "Error")
    );
    if !is_tag {
        return Arg::Value(value);
    }

    match Tagged::deserialize(&value) {
        Ok(Tagged::Buffer { data }) => Arg::Bytes(Bytes::from(data)),
        Ok(Tagged::Error { message, stack }) => Arg::Error(ErrorValue::with_stack(message, stack)),
        Err(_) => Arg::Value(value),
    }
}
