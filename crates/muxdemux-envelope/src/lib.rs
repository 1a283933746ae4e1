//! Self-delimited JSON envelopes for multiplexed substreams.
//!
//! Every control message on the physical channel is one envelope:
//! - `substream`: the target substream name
//! - `new`: present only when announcing a substream
//! - `method` and `args`: an operation to replay (`write`, `emit`, `end`)
//! - `source`: the id of the multiplexer that produced it
//!
//! In byte mode an envelope is a single JSON text chunk starting with `{` and
//! ending with `}`; there is no other framing. Chunks that do not decode are
//! passthrough data, never errors.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod method;
pub mod tags;

pub use codec::{decode, encode, try_decode, Decoded};
pub use envelope::{Envelope, Operation};
pub use error::{EnvelopeError, Result};
pub use method::Method;
pub use tags::{tag, untag};
