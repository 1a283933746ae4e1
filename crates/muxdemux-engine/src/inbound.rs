use std::rc::{Rc, Weak};

use muxdemux_channel::{event, Channel, ChannelError, Chunk, ErrorValue, Transform};
use muxdemux_envelope::{try_decode, Decoded, Envelope, Operation};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::mux::Core;

/// The physical channel's transform: decode, replay, forward.
pub(crate) struct Dispatcher {
    core: Weak<Core>,
}

impl Dispatcher {
    pub(crate) fn new(core: Weak<Core>) -> Self {
        Self { core }
    }
}

impl Transform for Dispatcher {
    fn transform(&self, channel: &Channel, chunk: Chunk) -> muxdemux_channel::Result<()> {
        match self.core.upgrade() {
            Some(core) => core.receive(chunk).map_err(ChannelError::from),
            None => channel.push(chunk).map(|_| ()),
        }
    }

    fn finish(&self, _channel: &Channel) -> muxdemux_channel::Result<()> {
        match self.core.upgrade() {
            Some(core) => core.on_physical_finish().map_err(ChannelError::from),
            None => Ok(()),
        }
    }

    fn error(&self, _channel: &Channel, err: &ErrorValue) -> muxdemux_channel::Result<bool> {
        match self.core.upgrade() {
            Some(core) => core.on_physical_error(err).map_err(ChannelError::from),
            None => Ok(false),
        }
    }
}

impl Core {
    /// Process one chunk written into the physical channel.
    fn receive(self: &Rc<Self>, chunk: Chunk) -> Result<()> {
        let envelope = match try_decode(&chunk, self.mode) {
            Decoded::Envelope(envelope) => envelope,
            Decoded::Passthrough => return self.forward(chunk),
        };
        if envelope.is_from(&self.id) {
            trace!(mux_id = %self.id, substream = %envelope.substream, "dropping own envelope");
            return Ok(());
        }
        self.dispatch(envelope)?;
        self.forward(chunk)
    }

    fn forward(&self, chunk: Chunk) -> Result<()> {
        if !self.options.circular {
            self.channel.push(chunk)?;
        }
        Ok(())
    }

    fn dispatch(self: &Rc<Self>, envelope: Envelope) -> Result<()> {
        let name = envelope.substream;

        if envelope.new {
            if self.registry.borrow_mut().note(&name) {
                debug!(mux_id = %self.id, substream = %name, "substream announced by peer");
                self.discover(&name)?;
            } else {
                trace!(mux_id = %self.id, substream = %name, "repeated announcement");
            }
        }

        let Some(operation) = envelope.operation else {
            return Ok(());
        };

        if self.registry.borrow().is_finished(&name) {
            trace!(mux_id = %self.id, substream = %name, "operation for finished substream");
            return Ok(());
        }

        let existing = self.registry.borrow().get(&name);
        let stream = match existing {
            Some(stream) => stream,
            None if matches!(operation, Operation::End(_)) => {
                debug!(mux_id = %self.id, substream = %name, "peer ended unmaterialized substream");
                return self.settle(&name);
            }
            None if self.has_handlers() => self.handle(&name).channel().clone(),
            None => {
                trace!(mux_id = %self.id, substream = %name, "no local substream, dropping");
                return Ok(());
            }
        };

        trace!(mux_id = %self.id, substream = %name, method = %operation.method(), "replaying");
        self.replay(&name, &stream, operation)
    }

    fn replay(&self, name: &str, stream: &Channel, operation: Operation) -> Result<()> {
        match operation {
            Operation::Write(arg) => {
                match Chunk::from_arg(arg, self.mode) {
                    Ok(chunk) => {
                        stream.write(chunk)?;
                    }
                    Err(err) => {
                        warn!(
                            mux_id = %self.id,
                            substream = name,
                            error = %err,
                            "dropping unwritable argument"
                        );
                    }
                }
                Ok(())
            }
            Operation::Emit { event, args } => {
                let finishing = event::is_error(&event);
                if finishing {
                    self.mark_finished(name);
                }
                let emitted = stream.emit(&event, args);
                let closed = if finishing {
                    self.close_if_settled()
                } else {
                    Ok(())
                };
                emitted?;
                closed
            }
            Operation::End(arg) => {
                self.mark_finished(name);
                let written = match arg.map(|arg| Chunk::from_arg(arg, self.mode)) {
                    Some(Ok(chunk)) => stream.write(chunk).map(|_| ()),
                    Some(Err(err)) => {
                        warn!(
                            mux_id = %self.id,
                            substream = name,
                            error = %err,
                            "dropping unwritable final argument"
                        );
                        Ok(())
                    }
                    None => Ok(()),
                };
                let ended = stream.end();
                let closed = self.close_if_settled();
                written?;
                ended?;
                closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use muxdemux_channel::Mode;
    use serde_json::json;

    use super::*;
    use crate::config::MuxOptions;
    use crate::error::MuxError;
    use crate::Multiplexer;

    fn output(mux: &Multiplexer) -> Rc<RefCell<Vec<Chunk>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        mux.on_data(move |chunk| sink.borrow_mut().push(chunk.clone()))
            .unwrap();
        seen
    }

    fn envelope(value: serde_json::Value) -> Chunk {
        Chunk::Object(value)
    }

    #[test]
    fn forwards_original_chunks() {
        let demux = Multiplexer::new(Mode::Object, MuxOptions::default());
        let seen = output(&demux);
        let announce = envelope(json!({ "substream": "foo", "new": true, "source": "peer" }));
        demux.write(announce.clone()).unwrap();
        demux.write(json!({ "plain": true })).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![announce, Chunk::Object(json!({ "plain": true }))]
        );
        assert_eq!(demux.known_substreams(), vec!["foo".to_string()]);
    }

    #[test]
    fn own_envelopes_are_dropped() {
        let demux = Multiplexer::new(Mode::Object, MuxOptions::default().with_id("me"));
        let seen = output(&demux);
        let calls = Rc::new(Cell::new(0));
        let count = Rc::clone(&calls);
        demux.on_substream(move |_| {
            count.set(count.get() + 1);
            Ok(())
        });

        demux
            .write(envelope(json!({ "substream": "foo", "new": true, "source": "me" })))
            .unwrap();
        assert!(seen.borrow().is_empty());
        assert_eq!(calls.get(), 0);
        assert!(demux.known_substreams().is_empty());
    }

    #[test]
    fn circular_option_suppresses_forwarding() {
        let demux = Multiplexer::new(Mode::Object, MuxOptions::default().circular(true));
        let seen = output(&demux);
        demux
            .write(envelope(json!({ "substream": "foo", "new": true, "source": "peer" })))
            .unwrap();
        demux.write(json!("raw")).unwrap();
        assert!(seen.borrow().is_empty());
        assert_eq!(demux.known_substreams(), vec!["foo".to_string()]);
    }

    #[test]
    fn announcement_runs_handlers_once() {
        let names = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&names);
        let demux = Multiplexer::with_handler(Mode::Object, MuxOptions::default(), move |s| {
            sink.borrow_mut().push(s.name().to_string());
            Ok(())
        });
        let announce = envelope(json!({ "substream": "foo", "new": true }));
        demux.write(announce.clone()).unwrap();
        demux.write(announce).unwrap();
        assert_eq!(*names.borrow(), vec!["foo".to_string()]);
    }

    #[test]
    fn writes_without_handler_or_mirror_are_dropped() {
        let demux = Multiplexer::new(Mode::Object, MuxOptions::default());
        let seen = output(&demux);
        demux
            .write(envelope(json!({ "substream": "foo", "method": "write", "args": [1] })))
            .unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert!(demux.known_substreams().is_empty());
    }

    #[test]
    fn writes_demand_create_when_handlers_listen() {
        let demux = Multiplexer::with_handler(Mode::Object, MuxOptions::default(), |_| Ok(()));
        demux
            .write(envelope(json!({ "substream": "foo", "method": "write", "args": [1] })))
            .unwrap();
        assert_eq!(demux.known_substreams(), vec!["foo".to_string()]);

        let foo = demux.substream("foo").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        foo.on_data(move |chunk| sink.borrow_mut().push(chunk.clone()))
            .unwrap();
        assert_eq!(*seen.borrow(), vec![Chunk::Object(json!(1))]);
    }

    #[test]
    fn end_for_unknown_name_finishes_it_permanently() {
        let demux = Multiplexer::new(Mode::Object, MuxOptions::default());
        demux
            .write(envelope(json!({ "substream": "foo", "new": true })))
            .unwrap();
        demux
            .write(envelope(json!({ "substream": "foo", "method": "end", "args": [] })))
            .unwrap();

        assert!(demux.is_substream_finished("foo"));
        assert!(demux.is_finished());
        assert!(matches!(
            demux.substream("foo"),
            Err(MuxError::SubstreamFinished(name)) if name == "foo"
        ));
    }

    #[test]
    fn replayed_events_carry_untagged_args() {
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        let demux = Multiplexer::with_handler(Mode::Object, MuxOptions::default(), move |s| {
            let sink = Rc::clone(&sink);
            s.on("stuff", move |args| sink.borrow_mut().push(args.to_vec()));
            Ok(())
        });
        demux
            .write(envelope(json!({ "substream": "foo", "new": true })))
            .unwrap();
        demux
            .write(envelope(json!({
                "substream": "foo",
                "method": "emit",
                "args": [
                    "stuff",
                    { "type": "Buffer", "data": [104, 105] },
                    { "type": "Error", "message": "boom", "stack": "Error: boom" }
                ]
            })))
            .unwrap();

        let received = received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0][0].as_bytes().unwrap().as_ref(), b"hi");
        let err = received[0][1].as_error().unwrap();
        assert_eq!(err.message(), "boom");
        assert_eq!(err.stack(), Some("Error: boom"));
    }

    #[test]
    fn replayed_error_without_observer_is_fatal() {
        let demux = Multiplexer::with_handler(Mode::Object, MuxOptions::default(), |_| Ok(()));
        demux
            .write(envelope(json!({ "substream": "foo", "new": true })))
            .unwrap();
        let err = demux
            .write(envelope(json!({
                "substream": "foo",
                "method": "emit",
                "args": ["error", { "type": "Error", "message": "boom" }]
            })))
            .unwrap_err();
        assert_eq!(err.unhandled().map(|e| e.message()), Some("boom"));
        assert!(demux.is_substream_finished("foo"));
    }

    #[test]
    fn byte_mode_replays_strings_as_bytes() {
        let demux = Multiplexer::with_handler(Mode::Bytes, MuxOptions::default(), |_| Ok(()));
        demux
            .write(Chunk::from(r#"{"substream":"foo","method":"write","args":["uno"]}"#))
            .unwrap();
        let foo = demux.substream("foo").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        foo.on_data(move |chunk| sink.borrow_mut().push(chunk.clone()))
            .unwrap();
        assert_eq!(*seen.borrow(), vec![Chunk::from("uno")]);
    }
}
