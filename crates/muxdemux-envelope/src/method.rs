//! Operation names carried in the envelope `method` field.
//!
//! Only these three may be replayed on a substream. Anything else makes the
//! chunk passthrough data.

use std::fmt;

/// Wire name of a write.
pub const WRITE: &str = "write";

/// Wire name of an event emission.
pub const EMIT: &str = "emit";

/// Wire name of an end.
pub const END: &str = "end";

/// A replayable substream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Write,
    Emit,
    End,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Write, Method::Emit, Method::End];

    /// The name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Write => WRITE,
            Method::Emit => EMIT,
            Method::End => END,
        }
    }

    /// Look up a method by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            WRITE => Some(Method::Write),
            EMIT => Some(Method::Emit),
            END => Some(Method::End),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
