//! Substream multiplexing over a single duplex channel.
//!
//! This is the engine layer of muxdemux. A [`Multiplexer`] hands out named
//! substreams whose operations travel as envelopes on one physical channel,
//! and replays envelopes arriving on that channel onto local mirrors.
//! It ends the physical channel once every substream has finished, and
//! escalates an early finish or failure to the substreams still open.

pub mod config;
pub mod coordinator;
pub mod error;
mod inbound;
pub mod mux;
pub mod outbound;
pub mod registry;

pub use config::MuxOptions;
pub use coordinator::{UNEXPECTED_ERROR_PREFIX, UNEXPECTED_FINISH};
pub use error::{MuxError, Result};
pub use mux::{Multiplexer, SubstreamHandler};
pub use outbound::SubstreamHandle;
pub use registry::Registry;
