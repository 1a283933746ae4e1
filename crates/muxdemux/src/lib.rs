//! Many named substreams over one duplex channel.
//!
//! muxdemux turns writes, events and ends on named substreams into
//! self-describing envelopes on a single physical channel, and replays
//! envelopes arriving on that channel onto local mirror substreams. Both
//! directions live in one [`engine::Multiplexer`], so the same value can
//! multiplex, demultiplex, or sit in a loop with its peer.
//!
//! # Crate Structure
//!
//! - [`channel`]: Single-threaded duplex channels with backpressure and piping
//! - [`envelope`]: Envelope codec and argument tagging
//! - [`engine`]: Substream registry, dispatch and lifecycle coordination
//!
//! # Example
//!
//! ```
//! use muxdemux::{Mode, Multiplexer, MuxOptions};
//!
//! let mux = Multiplexer::new(Mode::Bytes, MuxOptions::default());
//! let demux = Multiplexer::new(Mode::Bytes, MuxOptions::default());
//! mux.pipe(demux.clone()).unwrap();
//!
//! let logs = mux.substream("logs").unwrap();
//! logs.write("hello").unwrap();
//! logs.end().unwrap();
//! assert!(demux.is_substream_finished("logs"));
//! ```

/// Re-export channel types.
pub mod channel {
    pub use muxdemux_channel::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use muxdemux_envelope::*;
}

/// Re-export engine types.
pub mod engine {
    pub use muxdemux_engine::*;
}

pub use muxdemux_channel::{Arg, Channel, ChannelError, Chunk, ErrorValue, Mode, Writable};
pub use muxdemux_engine::{Multiplexer, MuxError, MuxOptions, SubstreamHandle};
