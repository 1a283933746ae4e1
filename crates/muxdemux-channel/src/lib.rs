//! Single-threaded duplex channels.
//!
//! A [`Channel`] has a writable side and a readable side. Written chunks run
//! through an optional [`Transform`] and come out of the readable side in
//! order, to data observers and pipe destinations, with high-water-mark
//! backpressure between them.
//!
//! This is the lowest layer of muxdemux. The envelope codec and the
//! multiplexing engine build on the types provided here.

pub mod channel;
pub mod chunk;
pub mod error;
pub mod event;
pub mod io;
pub mod traits;

pub use channel::{Channel, ChannelConfig, Transform};
pub use chunk::{
    Arg, Chunk, ErrorValue, Mode, DEFAULT_HIGH_WATER_MARK_BYTES, DEFAULT_HIGH_WATER_MARK_OBJECTS,
};
pub use error::{ChannelError, Result};
pub use io::{pump, wait_for_drain, Boundary, ChunkReader, ChunkWriter};
pub use traits::{DrainCallback, Writable};
