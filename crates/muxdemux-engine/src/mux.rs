use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use muxdemux_channel::{
    Arg, Channel, Chunk, DrainCallback, ErrorValue, Mode, Writable,
};
use muxdemux_envelope::Envelope;
use tracing::debug;

use crate::config::MuxOptions;
use crate::error::{MuxError, Result};
use crate::inbound::Dispatcher;
use crate::outbound::SubstreamHandle;
use crate::registry::Registry;

/// Callback run when a substream is discovered, locally or from a peer.
pub type SubstreamHandler = Rc<dyn Fn(SubstreamHandle) -> Result<()>>;

/// State shared by a multiplexer, its dispatcher and its substream handles.
pub(crate) struct Core {
    pub(crate) id: String,
    pub(crate) mode: Mode,
    pub(crate) options: MuxOptions,
    pub(crate) channel: Channel,
    pub(crate) registry: RefCell<Registry>,
    handlers: RefCell<Vec<SubstreamHandler>>,
}

impl Core {
    /// Push an envelope onto the physical channel's output.
    ///
    /// Returns whether the physical channel is still below its high-water
    /// mark.
    pub(crate) fn send(&self, envelope: Envelope) -> Result<bool> {
        let chunk = envelope.with_source(self.id.clone()).to_chunk(self.mode)?;
        Ok(self.channel.push(chunk)?)
    }

    /// Handle for `name`, creating its mirror without announcing it.
    pub(crate) fn handle(self: &Rc<Self>, name: &str) -> SubstreamHandle {
        let config = self.options.channel_config(self.mode);
        let (stream, created) = self.registry.borrow_mut().get_or_create(name, config);
        if created {
            debug!(mux_id = %self.id, substream = name, "created substream mirror");
        }
        SubstreamHandle::new(Rc::clone(self), name, stream)
    }

    pub(crate) fn has_handlers(&self) -> bool {
        !self.handlers.borrow().is_empty()
    }

    /// Run every discovery handler for `name`, in registration order.
    pub(crate) fn discover(self: &Rc<Self>, name: &str) -> Result<()> {
        let handlers = self.handlers.borrow().clone();
        for handler in handlers {
            handler(self.handle(name))?;
        }
        Ok(())
    }
}

/// A substream multiplexer and demultiplexer over one physical channel.
///
/// Substreams obtained with [`substream`](Multiplexer::substream) turn their
/// writes, events and ends into envelopes on the physical channel's output.
/// Chunks written into the physical channel are decoded, replayed on local
/// mirror substreams, and forwarded downstream unchanged. Cloning yields
/// another handle to the same multiplexer.
#[derive(Clone)]
pub struct Multiplexer {
    core: Rc<Core>,
}

impl Multiplexer {
    /// Create a multiplexer carrying `mode` chunks.
    pub fn new(mode: Mode, options: MuxOptions) -> Self {
        let id = options
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let config = options.channel_config(mode);

        let core = Rc::new_cyclic(|weak| Core {
            id,
            mode,
            channel: Channel::with_transform(config, Rc::new(Dispatcher::new(weak.clone()))),
            options,
            registry: RefCell::new(Registry::new()),
            handlers: RefCell::new(Vec::new()),
        });
        debug!(mux_id = %core.id, %mode, "multiplexer created");
        Self { core }
    }

    /// Create a multiplexer with a discovery handler already registered.
    pub fn with_handler(
        mode: Mode,
        options: MuxOptions,
        handler: impl Fn(SubstreamHandle) -> Result<()> + 'static,
    ) -> Self {
        let mux = Self::new(mode, options);
        mux.on_substream(handler);
        mux
    }

    /// Register a discovery handler.
    ///
    /// Handlers run synchronously in registration order whenever a substream
    /// name becomes known, whether created here or announced by a peer.
    pub fn on_substream(&self, handler: impl Fn(SubstreamHandle) -> Result<()> + 'static) {
        self.core.handlers.borrow_mut().push(Rc::new(handler));
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn mode(&self) -> Mode {
        self.core.mode
    }

    pub fn options(&self) -> &MuxOptions {
        &self.core.options
    }

    /// The substream called `name`, created and announced on first use.
    ///
    /// Fails with [`MuxError::SubstreamFinished`] for a name a peer ended
    /// before it was ever materialized here, and with [`MuxError::Closed`]
    /// once the physical channel is ending.
    pub fn substream(&self, name: &str) -> Result<SubstreamHandle> {
        let core = &self.core;
        let existing = core.registry.borrow().get(name);
        if let Some(stream) = existing {
            return Ok(SubstreamHandle::new(Rc::clone(core), name, stream));
        }
        if core.registry.borrow().is_finished(name) {
            return Err(MuxError::SubstreamFinished(name.to_string()));
        }
        if core.channel.is_ending() {
            return Err(MuxError::Closed);
        }

        let announce = core.registry.borrow_mut().note(name);
        let handle = core.handle(name);
        if announce {
            debug!(mux_id = %core.id, substream = name, "announcing substream");
            core.send(Envelope::announce(name))?;
            core.discover(name)?;
        }
        Ok(handle)
    }

    /// Write a chunk into the physical channel.
    pub fn write(&self, chunk: impl Into<Chunk>) -> Result<bool> {
        Ok(self.core.channel.write(chunk.into())?)
    }

    /// End the physical channel.
    pub fn end(&self) -> Result<()> {
        Ok(self.core.channel.end()?)
    }

    /// Fail the physical channel with `err`.
    pub fn fail(&self, err: ErrorValue) -> Result<()> {
        self.core.channel.emit_error(err)?;
        Ok(())
    }

    /// Emit an event on the physical channel itself.
    pub fn emit(&self, event: &str, args: Vec<Arg>) -> Result<bool> {
        Ok(self.core.channel.emit(event, args)?)
    }

    /// Forward the physical channel's output into `dest`.
    pub fn pipe<W: Writable + 'static>(&self, dest: W) -> Result<()> {
        Ok(self.core.channel.pipe(dest)?)
    }

    pub fn on_data(&self, observer: impl Fn(&Chunk) + 'static) -> Result<()> {
        Ok(self.core.channel.on_data(observer)?)
    }

    pub fn on_end(&self, observer: impl Fn() + 'static) {
        self.core.channel.on_end(observer);
    }

    pub fn on_finish(&self, observer: impl Fn() + 'static) {
        self.core.channel.on_finish(observer);
    }

    pub fn on_error(&self, observer: impl Fn(&ErrorValue) + 'static) {
        self.core.channel.on_error(observer);
    }

    pub fn on(&self, event: &str, observer: impl Fn(&[Arg]) + 'static) {
        self.core.channel.on(event, observer);
    }

    /// The physical channel.
    pub fn channel(&self) -> &Channel {
        &self.core.channel
    }

    /// The physical channel has finished.
    pub fn is_finished(&self) -> bool {
        self.core.channel.is_finished()
    }

    /// Every known substream has finished.
    pub fn all_finished(&self) -> bool {
        self.core.registry.borrow().all_finished()
    }

    pub fn is_substream_finished(&self, name: &str) -> bool {
        self.core.registry.borrow().is_finished(name)
    }

    /// Every substream name seen so far, sorted.
    pub fn known_substreams(&self) -> Vec<String> {
        self.core.registry.borrow().known()
    }
}

impl Writable for Multiplexer {
    fn write(&self, chunk: Chunk) -> muxdemux_channel::Result<bool> {
        self.core.channel.write(chunk)
    }

    fn end(&self) -> muxdemux_channel::Result<()> {
        self.core.channel.end()
    }

    fn emit(&self, event: &str, args: Vec<Arg>) -> muxdemux_channel::Result<bool> {
        self.core.channel.emit(event, args)
    }

    fn once_drain(&self, callback: DrainCallback) -> muxdemux_channel::Result<()> {
        self.core.channel.once_drain(callback)
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("id", &self.core.id)
            .field("mode", &self.core.mode)
            .field("options", &self.core.options)
            .field("known", &self.known_substreams())
            .finish()
    }
}
