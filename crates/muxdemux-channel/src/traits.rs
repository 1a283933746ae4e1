use crate::chunk::{Arg, Chunk};
use crate::error::Result;

/// Callback run once a backpressured writable can take more data.
pub type DrainCallback = Box<dyn FnOnce() -> Result<()>>;

/// The writable half of a duplex channel.
///
/// Anything implementing this can be the destination of [`Channel::pipe`],
/// which is how channels, substream handles and I/O sinks chain together.
///
/// [`Channel::pipe`]: crate::Channel::pipe
pub trait Writable {
    /// Write one chunk. `Ok(false)` means "not ready": wait for
    /// [`once_drain`](Writable::once_drain) before writing more.
    fn write(&self, chunk: Chunk) -> Result<bool>;

    /// Signal that no more chunks will be written.
    fn end(&self) -> Result<()>;

    /// Emit a named event. Returns whether anyone observed it.
    fn emit(&self, event: &str, args: Vec<Arg>) -> Result<bool>;

    /// Run `callback` once the writable has drained. Runs immediately if it
    /// is not currently backpressured.
    fn once_drain(&self, callback: DrainCallback) -> Result<()>;
}
