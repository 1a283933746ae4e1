use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::chunk::{Arg, Chunk, ErrorValue, Mode};
use crate::error::{ChannelError, Result};
use crate::event;
use crate::traits::{DrainCallback, Writable};

/// Per-chunk processing installed on a channel's writable side.
///
/// Without a transform, every written chunk is pushed to the readable side
/// unchanged.
pub trait Transform {
    /// Handle one written chunk. Call [`Channel::push`] to emit output.
    fn transform(&self, channel: &Channel, chunk: Chunk) -> Result<()>;

    /// Runs once when the writable side ends, before `finish` observers.
    fn finish(&self, _channel: &Channel) -> Result<()> {
        Ok(())
    }

    /// Runs before `error` observers. Return `true` to mark the error as
    /// handled even when no observer is registered.
    fn error(&self, _channel: &Channel, _err: &ErrorValue) -> Result<bool> {
        Ok(false)
    }
}

/// Configuration for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// What the channel carries.
    pub mode: Mode,
    /// Buffered amount (bytes or chunks, per mode) at which writes report
    /// backpressure.
    pub high_water_mark: usize,
}

impl ChannelConfig {
    /// Config for `mode` with its default high-water mark.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            high_water_mark: mode.default_high_water_mark(),
        }
    }

    pub fn bytes() -> Self {
        Self::new(Mode::Bytes)
    }

    pub fn objects() -> Self {
        Self::new(Mode::Object)
    }

    /// Override the high-water mark.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::bytes()
    }
}

type DataObserver = Rc<dyn Fn(&Chunk)>;
type SignalObserver = Rc<dyn Fn()>;
type ErrorObserver = Rc<dyn Fn(&ErrorValue)>;
type EventObserver = Rc<dyn Fn(&[Arg])>;

#[derive(Default)]
struct Observers {
    data: Vec<DataObserver>,
    end: Vec<SignalObserver>,
    finish: Vec<SignalObserver>,
    error: Vec<ErrorObserver>,
    events: Vec<(String, EventObserver)>,
    drain: Vec<DrainCallback>,
    pipes: Vec<Rc<dyn Writable>>,
}

#[derive(Default)]
struct State {
    /// Readable side, waiting for a consumer.
    buffer: VecDeque<Chunk>,
    buffered: usize,
    /// Writes that arrived while a transform was running.
    pending: VecDeque<Chunk>,
    transforming: bool,
    delivering: bool,
    paused: bool,
    awaiting_drain: usize,
    need_drain: bool,
    ending: bool,
    finished: bool,
    eof: bool,
    ended: bool,
    errored: bool,
}

struct Inner {
    config: ChannelConfig,
    transform: Option<Rc<dyn Transform>>,
    state: RefCell<State>,
    observers: RefCell<Observers>,
}

/// A single-threaded duplex channel.
///
/// Chunks written to the writable side go through the channel's
/// [`Transform`] (or straight through) and come out of the readable side,
/// in order, to data observers and pipe destinations. Cloning yields
/// another handle to the same channel.
///
/// Observers run synchronously in registration order. They may call back
/// into the channel: writes made while a chunk is being transformed are
/// queued behind it, and pushes made while chunks are being delivered are
/// delivered after them.
#[derive(Clone)]
pub struct Channel {
    inner: Rc<Inner>,
}

impl Channel {
    /// Create a passthrough channel.
    pub fn new(config: ChannelConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a channel whose written chunks run through `transform`.
    pub fn with_transform(config: ChannelConfig, transform: Rc<dyn Transform>) -> Self {
        Self::build(config, Some(transform))
    }

    fn build(config: ChannelConfig, transform: Option<Rc<dyn Transform>>) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                transform,
                state: RefCell::new(State::default()),
                observers: RefCell::new(Observers::default()),
            }),
        }
    }

    pub fn mode(&self) -> Mode {
        self.inner.config.mode
    }

    pub fn config(&self) -> ChannelConfig {
        self.inner.config
    }

    /// Returns true if both handles refer to the same channel.
    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Write a chunk to the writable side.
    ///
    /// Returns `Ok(false)` once the readable buffer reaches the high-water
    /// mark; the chunk is still accepted.
    pub fn write(&self, chunk: Chunk) -> Result<bool> {
        chunk.check(self.mode())?;
        let first = {
            let mut state = self.inner.state.borrow_mut();
            if state.ending {
                return Err(ChannelError::WriteAfterEnd);
            }
            if state.transforming {
                state.pending.push_back(chunk);
                return Ok(self.ready(&mut state));
            }
            state.transforming = true;
            // Writes left queued by a failed transform go first.
            match state.pending.pop_front() {
                Some(front) => {
                    state.pending.push_back(chunk);
                    front
                }
                None => chunk,
            }
        };

        self.process(first)?;
        let mut state = self.inner.state.borrow_mut();
        Ok(self.ready(&mut state))
    }

    /// Write a final chunk, then end.
    pub fn end_with(&self, chunk: Chunk) -> Result<()> {
        self.write(chunk)?;
        self.end()
    }

    /// End the writable side. Idempotent.
    ///
    /// If a chunk is being transformed, finishing waits until it and every
    /// queued write have been processed.
    pub fn end(&self) -> Result<()> {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.ending {
                return Ok(());
            }
            state.ending = true;
            if state.transforming {
                return Ok(());
            }
        }
        self.finish()
    }

    /// Push a chunk to the readable side.
    ///
    /// Returns whether the readable buffer is still below the high-water mark.
    pub fn push(&self, chunk: Chunk) -> Result<bool> {
        chunk.check(self.mode())?;
        {
            let mut state = self.inner.state.borrow_mut();
            if state.eof {
                return Err(ChannelError::PushAfterEof);
            }
            state.buffered += chunk.weight(self.inner.config.mode);
            state.buffer.push_back(chunk);
        }
        self.flow()?;
        let mut state = self.inner.state.borrow_mut();
        Ok(self.ready(&mut state))
    }

    /// Emit a named event.
    ///
    /// The `error` event is routed to [`emit_error`](Channel::emit_error).
    pub fn emit(&self, event: &str, args: Vec<Arg>) -> Result<bool> {
        if event::is_error(event) {
            let err = args
                .into_iter()
                .next()
                .map(error_from_arg)
                .unwrap_or_else(|| ErrorValue::with_stack("unspecified error", None));
            return self.emit_error(err);
        }

        let observers: Vec<EventObserver> = self
            .inner
            .observers
            .borrow()
            .events
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, observer)| Rc::clone(observer))
            .collect();
        for observer in &observers {
            observer(&args);
        }
        Ok(!observers.is_empty())
    }

    /// Raise an error on this channel.
    ///
    /// Returns `ChannelError::Unhandled` carrying `err` when no observer (and
    /// no transform hook) handled it.
    pub fn emit_error(&self, err: ErrorValue) -> Result<bool> {
        self.inner.state.borrow_mut().errored = true;

        let consumed = match &self.inner.transform {
            Some(transform) => transform.error(self, &err)?,
            None => false,
        };
        let observers = self.inner.observers.borrow().error.clone();
        for observer in &observers {
            observer(&err);
        }

        if observers.is_empty() && !consumed {
            return Err(ChannelError::Unhandled(err));
        }
        Ok(true)
    }

    /// Observe chunks leaving the readable side.
    ///
    /// Buffered chunks are delivered right away. That can release drain
    /// callbacks of whatever is piped into this channel, and their errors are
    /// returned here.
    pub fn on_data(&self, observer: impl Fn(&Chunk) + 'static) -> Result<()> {
        self.inner
            .observers
            .borrow_mut()
            .data
            .push(Rc::new(observer));
        self.flow()
    }

    /// Observe the readable side reaching its end.
    pub fn on_end(&self, observer: impl Fn() + 'static) {
        self.inner.observers.borrow_mut().end.push(Rc::new(observer));
    }

    /// Observe the writable side finishing.
    pub fn on_finish(&self, observer: impl Fn() + 'static) {
        self.inner
            .observers
            .borrow_mut()
            .finish
            .push(Rc::new(observer));
    }

    /// Observe errors raised on this channel.
    pub fn on_error(&self, observer: impl Fn(&ErrorValue) + 'static) {
        self.inner
            .observers
            .borrow_mut()
            .error
            .push(Rc::new(observer));
    }

    /// Observe an application-defined event.
    pub fn on(&self, event: &str, observer: impl Fn(&[Arg]) + 'static) {
        self.inner
            .observers
            .borrow_mut()
            .events
            .push((event.to_string(), Rc::new(observer)));
    }

    /// Number of registered error observers.
    pub fn error_observer_count(&self) -> usize {
        self.inner.observers.borrow().error.len()
    }

    /// Run `callback` once this channel drains below its high-water mark.
    pub fn once_drain(&self, callback: DrainCallback) -> Result<()> {
        if self.inner.state.borrow().need_drain {
            self.inner.observers.borrow_mut().drain.push(callback);
            Ok(())
        } else {
            callback()
        }
    }

    /// Forward everything leaving this channel into `dest`.
    ///
    /// Pauses while `dest` reports backpressure and ends `dest` when this
    /// channel's readable side ends.
    pub fn pipe<W: Writable + 'static>(&self, dest: W) -> Result<()> {
        let dest: Rc<dyn Writable> = Rc::new(dest);
        dest.emit(event::PIPE, Vec::new())?;
        self.inner.observers.borrow_mut().pipes.push(dest);
        self.flow()
    }

    /// Detach every pipe destination.
    pub fn unpipe(&self) -> Result<()> {
        let pipes = std::mem::take(&mut self.inner.observers.borrow_mut().pipes);
        for dest in pipes {
            dest.emit(event::UNPIPE, Vec::new())?;
        }
        Ok(())
    }

    /// Stop delivering buffered chunks.
    pub fn pause(&self) {
        self.inner.state.borrow_mut().paused = true;
    }

    /// Resume delivery after [`pause`](Channel::pause).
    pub fn resume(&self) -> Result<()> {
        self.inner.state.borrow_mut().paused = false;
        self.flow()
    }

    /// `end()` has been called.
    pub fn is_ending(&self) -> bool {
        self.inner.state.borrow().ending
    }

    /// The writable side has finished.
    pub fn is_finished(&self) -> bool {
        self.inner.state.borrow().finished
    }

    /// The readable side has delivered its end.
    pub fn is_ended(&self) -> bool {
        self.inner.state.borrow().ended
    }

    /// The readable side no longer accepts pushes.
    pub fn is_eof(&self) -> bool {
        self.inner.state.borrow().eof
    }

    /// An error has been raised on this channel.
    pub fn is_errored(&self) -> bool {
        self.inner.state.borrow().errored
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.borrow().paused
    }

    /// Amount buffered on the readable side, in bytes or chunks.
    pub fn buffered(&self) -> usize {
        self.inner.state.borrow().buffered
    }

    fn ready(&self, state: &mut State) -> bool {
        let ready = state.buffered < self.inner.config.high_water_mark;
        if !ready {
            state.need_drain = true;
        }
        ready
    }

    fn process(&self, first: Chunk) -> Result<()> {
        let mut next = Some(first);
        let mut outcome = Ok(());
        while let Some(chunk) = next {
            if let Err(err) = self.transform_one(chunk) {
                outcome = Err(err);
                break;
            }
            next = self.inner.state.borrow_mut().pending.pop_front();
        }

        let finish_now = {
            let mut state = self.inner.state.borrow_mut();
            state.transforming = false;
            state.ending && !state.finished
        };
        outcome?;
        if finish_now {
            self.finish()?;
        }
        Ok(())
    }

    fn transform_one(&self, chunk: Chunk) -> Result<()> {
        match &self.inner.transform {
            Some(transform) => transform.transform(self, chunk),
            None => self.push(chunk).map(|_| ()),
        }
    }

    fn finish(&self) -> Result<()> {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.finished {
                return Ok(());
            }
            state.finished = true;
        }

        let hook = match &self.inner.transform {
            Some(transform) => transform.finish(self),
            None => Ok(()),
        };
        let observers = self.inner.observers.borrow().finish.clone();
        for observer in &observers {
            observer();
        }

        self.inner.state.borrow_mut().eof = true;
        let flushed = self.flow();
        hook.and(flushed)
    }

    fn has_consumers(&self) -> bool {
        let observers = self.inner.observers.borrow();
        !observers.data.is_empty() || !observers.pipes.is_empty()
    }

    fn flow(&self) -> Result<()> {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.delivering {
                return Ok(());
            }
            state.delivering = true;
        }
        let delivered = self.deliver();
        self.inner.state.borrow_mut().delivering = false;
        delivered?;
        self.maybe_end()
    }

    fn deliver(&self) -> Result<()> {
        loop {
            let chunk = {
                let mut state = self.inner.state.borrow_mut();
                if state.paused || !self.has_consumers() {
                    return Ok(());
                }
                match state.buffer.pop_front() {
                    Some(chunk) => {
                        state.buffered -= chunk.weight(self.inner.config.mode);
                        chunk
                    }
                    None => return Ok(()),
                }
            };

            let (data, pipes) = {
                let observers = self.inner.observers.borrow();
                (observers.data.clone(), observers.pipes.clone())
            };
            for observer in &data {
                observer(&chunk);
            }
            // Every destination gets the chunk even if an earlier one fails.
            let mut outcome = Ok(());
            for dest in &pipes {
                let written = match dest.write(chunk.clone()) {
                    Ok(true) => Ok(()),
                    Ok(false) => self.await_drain(dest),
                    Err(err) => Err(err),
                };
                if outcome.is_ok() {
                    outcome = written;
                }
            }
            outcome?;
            self.maybe_drain()?;
        }
    }

    fn await_drain(&self, dest: &Rc<dyn Writable>) -> Result<()> {
        {
            let mut state = self.inner.state.borrow_mut();
            state.paused = true;
            state.awaiting_drain += 1;
        }
        let source = self.clone();
        dest.once_drain(Box::new(move || source.release_drain()))
    }

    fn release_drain(&self) -> Result<()> {
        let resume = {
            let mut state = self.inner.state.borrow_mut();
            state.awaiting_drain = state.awaiting_drain.saturating_sub(1);
            state.awaiting_drain == 0
        };
        if resume {
            self.resume()
        } else {
            Ok(())
        }
    }

    fn maybe_drain(&self) -> Result<()> {
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.need_drain || state.buffered >= self.inner.config.high_water_mark {
                return Ok(());
            }
            state.need_drain = false;
        }
        let callbacks = std::mem::take(&mut self.inner.observers.borrow_mut().drain);
        let mut outcome = Ok(());
        for callback in callbacks {
            let ran = callback();
            if outcome.is_ok() {
                outcome = ran;
            }
        }
        outcome
    }

    fn maybe_end(&self) -> Result<()> {
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.eof || state.ended || state.paused || !state.buffer.is_empty() {
                return Ok(());
            }
            state.ended = true;
        }

        let (observers, pipes) = {
            let mut observers = self.inner.observers.borrow_mut();
            (observers.end.clone(), std::mem::take(&mut observers.pipes))
        };
        for observer in &observers {
            observer();
        }

        let mut outcome = Ok(());
        for dest in pipes {
            let ended = dest
                .end()
                .and_then(|()| dest.emit(event::UNPIPE, Vec::new()).map(|_| ()));
            if outcome.is_ok() {
                outcome = ended;
            }
        }
        outcome
    }
}

fn error_from_arg(arg: Arg) -> ErrorValue {
    match arg {
        Arg::Error(err) => err,
        Arg::Value(Value::String(message)) => ErrorValue::with_stack(message, None),
        Arg::Value(other) => ErrorValue::with_stack(other.to_string(), None),
        Arg::Bytes(bytes) => {
            ErrorValue::with_stack(String::from_utf8_lossy(&bytes).into_owned(), None)
        }
    }
}

impl Writable for Channel {
    fn write(&self, chunk: Chunk) -> Result<bool> {
        Channel::write(self, chunk)
    }

    fn end(&self) -> Result<()> {
        Channel::end(self)
    }

    fn emit(&self, event: &str, args: Vec<Arg>) -> Result<bool> {
        Channel::emit(self, event, args)
    }

    fn once_drain(&self, callback: DrainCallback) -> Result<()> {
        Channel::once_drain(self, callback)
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Channel {}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Channel")
            .field("mode", &self.inner.config.mode)
            .field("buffered", &state.buffered)
            .field("ending", &state.ending)
            .field("finished", &state.finished)
            .field("ended", &state.ended)
            .finish()
    }
}
