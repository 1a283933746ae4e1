use std::fmt;
use std::rc::Rc;

use muxdemux_channel::{
    event, Arg, Channel, ChannelError, Chunk, DrainCallback, ErrorValue, Mode, Writable,
};
use muxdemux_envelope::{Envelope, Operation};
use tracing::trace;

use crate::error::Result;
use crate::mux::Core;

/// A named substream of a [`Multiplexer`](crate::Multiplexer).
///
/// Writes, events and ends go to the physical channel as envelopes first,
/// then to the local mirror channel so local observers see them too.
/// Handles for the same name compare equal.
#[derive(Clone)]
pub struct SubstreamHandle {
    core: Rc<Core>,
    name: Rc<str>,
    stream: Channel,
}

impl SubstreamHandle {
    pub(crate) fn new(core: Rc<Core>, name: &str, stream: Channel) -> Self {
        Self {
            core,
            name: Rc::from(name),
            stream,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.stream.mode()
    }

    /// Write a chunk to this substream.
    ///
    /// Returns `Ok(false)` when either the physical channel or the local
    /// mirror is backpressured. Wait for
    /// [`once_drain`](SubstreamHandle::once_drain) before writing more.
    pub fn write(&self, chunk: impl Into<Chunk>) -> Result<bool> {
        let chunk = chunk.into();
        chunk.check(self.mode())?;
        if self.stream.is_ending() {
            return Err(ChannelError::WriteAfterEnd.into());
        }
        trace!(substream = %self.name, "write");
        let wire = self.send(Operation::write(chunk.clone()))?;
        let local = self.stream.write(chunk)?;
        Ok(wire && local)
    }

    /// Emit an event on this substream. Returns whether a local observer saw
    /// it.
    ///
    /// `pipe` and `unpipe` stay local. Emitting `error` finishes the
    /// substream; an error nobody observes locally is returned as
    /// [`ChannelError::Unhandled`].
    pub fn emit(&self, event: &str, args: Vec<Arg>) -> Result<bool> {
        let finishing = event::is_error(event);
        if finishing {
            self.core.mark_finished(&self.name);
        }
        let sent = if event::is_local_only(event) {
            Ok(true)
        } else {
            trace!(substream = %self.name, event, "emit");
            self.send(Operation::emit(event, args.clone()))
        };
        let emitted = self.stream.emit(event, args);
        let closed = if finishing {
            self.core.close_if_settled()
        } else {
            Ok(())
        };

        let observed = emitted?;
        sent?;
        closed?;
        Ok(observed)
    }

    /// Emit `err` as this substream's `error` event.
    pub fn emit_error(&self, err: ErrorValue) -> Result<bool> {
        self.emit(event::ERROR, vec![Arg::Error(err)])
    }

    /// End this substream. Idempotent.
    ///
    /// The name is finished before the end envelope goes out, and stays
    /// finished even if sending or the local end fails.
    pub fn end(&self) -> Result<()> {
        if self.stream.is_ending() {
            return Ok(());
        }
        trace!(substream = %self.name, "end");
        self.core.mark_finished(&self.name);
        let sent = self.send(Operation::End(None));
        let ended = self.stream.end();
        self.finish_end(sent, ended)
    }

    /// Write a final chunk, then end.
    pub fn end_with(&self, chunk: impl Into<Chunk>) -> Result<()> {
        let chunk = chunk.into();
        chunk.check(self.mode())?;
        if self.stream.is_ending() {
            return Err(ChannelError::WriteAfterEnd.into());
        }
        self.core.mark_finished(&self.name);
        let sent = self.send(Operation::End(Some(chunk.clone().into_arg())));
        let ended = self.stream.end_with(chunk);
        self.finish_end(sent, ended)
    }

    fn finish_end(&self, sent: Result<bool>, ended: muxdemux_channel::Result<()>) -> Result<()> {
        let closed = self.core.close_if_settled();
        sent?;
        ended?;
        closed
    }

    fn send(&self, operation: Operation) -> Result<bool> {
        self.core.send(Envelope::operation(self.name.as_ref(), operation))
    }

    /// Waits on the physical channel, then on the local mirror.
    fn drain_both(&self, callback: DrainCallback) -> muxdemux_channel::Result<()> {
        let stream = self.stream.clone();
        self.core
            .channel
            .once_drain(Box::new(move || stream.once_drain(callback)))
    }

    pub fn on_data(&self, observer: impl Fn(&Chunk) + 'static) -> Result<()> {
        Ok(self.stream.on_data(observer)?)
    }

    pub fn on_end(&self, observer: impl Fn() + 'static) {
        self.stream.on_end(observer);
    }

    pub fn on_finish(&self, observer: impl Fn() + 'static) {
        self.stream.on_finish(observer);
    }

    pub fn on_error(&self, observer: impl Fn(&ErrorValue) + 'static) {
        self.stream.on_error(observer);
    }

    pub fn on(&self, event: &str, observer: impl Fn(&[Arg]) + 'static) {
        self.stream.on(event, observer);
    }

    /// Forward this substream's output into `dest`.
    pub fn pipe<W: Writable + 'static>(&self, dest: W) -> Result<()> {
        Ok(self.stream.pipe(dest)?)
    }

    /// Run `callback` once both the physical channel and the local mirror
    /// have drained.
    pub fn once_drain(&self, callback: DrainCallback) -> Result<()> {
        Ok(self.drain_both(callback)?)
    }

    pub fn pause(&self) {
        self.stream.pause();
    }

    pub fn resume(&self) -> Result<()> {
        Ok(self.stream.resume()?)
    }

    /// This substream is finished in its multiplexer.
    pub fn is_finished(&self) -> bool {
        self.core.registry.borrow().is_finished(&self.name)
    }

    /// The local mirror channel.
    pub fn channel(&self) -> &Channel {
        &self.stream
    }
}

impl Writable for SubstreamHandle {
    fn write(&self, chunk: Chunk) -> muxdemux_channel::Result<bool> {
        SubstreamHandle::write(self, chunk).map_err(ChannelError::from)
    }

    fn end(&self) -> muxdemux_channel::Result<()> {
        SubstreamHandle::end(self).map_err(ChannelError::from)
    }

    fn emit(&self, event: &str, args: Vec<Arg>) -> muxdemux_channel::Result<bool> {
        SubstreamHandle::emit(self, event, args).map_err(ChannelError::from)
    }

    fn once_drain(&self, callback: DrainCallback) -> muxdemux_channel::Result<()> {
        self.drain_both(callback)
    }
}

impl PartialEq for SubstreamHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core) && self.stream.ptr_eq(&other.stream)
    }
}

impl Eq for SubstreamHandle {}

impl fmt::Debug for SubstreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstreamHandle")
            .field("name", &self.name)
            .field("mux_id", &self.core.id)
            .field("stream", &self.stream)
            .finish()
    }
}

impl From<SubstreamHandle> for Channel {
    fn from(handle: SubstreamHandle) -> Self {
        handle.stream
    }
}
