//! Deciding when the physical channel ends, and what open substreams see
//! when it ends or fails underneath them.

use muxdemux_channel::{Channel, ErrorValue};
use tracing::debug;

use crate::error::Result;
use crate::mux::Core;

/// Message raised on open substreams when the physical channel finishes.
pub const UNEXPECTED_FINISH: &str = "unexpected muxdemux finish";

/// Prefix for physical channel errors relabeled onto open substreams.
pub const UNEXPECTED_ERROR_PREFIX: &str = "unexpected muxdemux error: ";

impl Core {
    /// Record that substream `name` finished.
    ///
    /// Runs before any envelope or local end for `name` goes out, so anything
    /// those trigger synchronously already sees the name as finished.
    pub(crate) fn mark_finished(&self, name: &str) {
        let all_finished = {
            let mut registry = self.registry.borrow_mut();
            registry.mark_finished(name);
            registry.all_finished()
        };
        debug!(mux_id = %self.id, substream = name, all_finished, "substream finished");
    }

    /// End the physical channel if every known substream has finished.
    pub(crate) fn close_if_settled(&self) -> Result<()> {
        if self.options.keep_open || !self.registry.borrow().all_finished() {
            return Ok(());
        }
        if !self.channel.is_ending() {
            debug!(mux_id = %self.id, "all substreams finished, ending physical channel");
        }
        self.channel.end()?;
        Ok(())
    }

    /// Mark `name` finished and end the physical channel if it was the last.
    pub(crate) fn settle(&self, name: &str) -> Result<()> {
        self.mark_finished(name);
        self.close_if_settled()
    }

    /// Runs when the physical channel's writable side finishes.
    pub(crate) fn on_physical_finish(&self) -> Result<()> {
        let (all_finished, open) = {
            let registry = self.registry.borrow();
            (registry.all_finished(), registry.open_streams())
        };

        let escalate = self.options.unexpected_finish_error && !all_finished;
        if escalate {
            debug!(mux_id = %self.id, open = open.len(), "physical channel finished early");
        }
        let mut outcome = Ok(());
        for (name, stream) in open {
            self.registry.borrow_mut().mark_finished(&name);
            let closed = if escalate {
                raise_then_end(&stream, ErrorValue::new(UNEXPECTED_FINISH))
            } else {
                stream.end()
            };
            if outcome.is_ok() {
                outcome = closed;
            }
        }
        Ok(outcome?)
    }

    /// Runs when the physical channel fails. Always consumes the error.
    pub(crate) fn on_physical_error(&self, err: &ErrorValue) -> Result<bool> {
        if !self.options.unexpected_finish_error {
            debug!(mux_id = %self.id, error = %err, "physical channel error swallowed");
            return Ok(true);
        }

        let relabeled = ErrorValue::with_stack(
            format!("{UNEXPECTED_ERROR_PREFIX}{}", err.message()),
            err.stack.clone(),
        );
        let open = self.registry.borrow().open_streams();
        debug!(mux_id = %self.id, error = %err, open = open.len(), "escalating physical channel error");

        let mut outcome = Ok(());
        for (name, stream) in open {
            self.registry.borrow_mut().mark_finished(&name);
            let raised = raise_then_end(&stream, relabeled.clone());
            if outcome.is_ok() {
                outcome = raised;
            }
        }
        outcome?;
        Ok(true)
    }
}

/// Raise `err` on a mirror whose physical channel is gone, then end it.
///
/// The mirror is ended even when nobody observes the error; the unhandled
/// error is still what gets returned.
fn raise_then_end(stream: &Channel, err: ErrorValue) -> muxdemux_channel::Result<()> {
    let raised = stream.emit_error(err).map(|_| ());
    let ended = stream.end();
    raised.and(ended)
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use muxdemux_channel::Mode;
    use serde_json::json;

    use super::*;
    use crate::config::MuxOptions;
    use crate::Multiplexer;

    fn record_errors(mux: &Multiplexer, name: &str) -> Rc<RefCell<Vec<String>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        mux.substream(name)
            .unwrap()
            .on_error(move |err| sink.borrow_mut().push(err.message().to_string()));
        seen
    }

    fn count_finish(mux: &Multiplexer) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        mux.on_finish(move || c.set(c.get() + 1));
        count
    }

    #[test]
    fn ends_once_all_substreams_end() {
        let mux = Multiplexer::new(Mode::Object, MuxOptions::default());
        let finished = count_finish(&mux);
        let foo = mux.substream("foo").unwrap();
        let bar = mux.substream("bar").unwrap();
        foo.write(json!({ "data": 1 })).unwrap();
        bar.write(json!({ "data": 1 })).unwrap();

        foo.end().unwrap();
        assert_eq!(finished.get(), 0);
        bar.end().unwrap();
        assert_eq!(finished.get(), 1);
    }

    #[test]
    fn keep_open_waits_for_explicit_end() {
        let mux = Multiplexer::new(Mode::Object, MuxOptions::default().keep_open(true));
        let finished = count_finish(&mux);
        mux.substream("foo").unwrap().end().unwrap();
        mux.substream("bar").unwrap().end().unwrap();
        assert_eq!(finished.get(), 0);
        assert!(mux.all_finished());

        mux.end().unwrap();
        assert_eq!(finished.get(), 1);
    }

    #[test]
    fn early_finish_errors_open_substreams() {
        let mux = Multiplexer::new(Mode::Object, MuxOptions::default());
        let foo = record_errors(&mux, "foo");
        let bar = record_errors(&mux, "bar");
        let qux = record_errors(&mux, "qux");
        mux.substream("qux").unwrap().end().unwrap();

        mux.end().unwrap();

        assert_eq!(*foo.borrow(), vec![UNEXPECTED_FINISH.to_string()]);
        assert_eq!(*bar.borrow(), vec![UNEXPECTED_FINISH.to_string()]);
        assert!(qux.borrow().is_empty());
        assert!(mux.all_finished());
    }

    #[test]
    fn early_finish_without_escalation_ends_quietly() {
        let mux = Multiplexer::new(
            Mode::Object,
            MuxOptions::default().unexpected_finish_error(false),
        );
        let foo = record_errors(&mux, "foo");
        let ended = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ended);
        mux.substream("foo").unwrap().on_finish(move || flag.set(true));

        mux.end().unwrap();

        assert!(foo.borrow().is_empty());
        assert!(ended.get());
    }

    #[test]
    fn physical_error_is_relabeled() {
        let mux = Multiplexer::new(Mode::Object, MuxOptions::default());
        let foo = record_errors(&mux, "foo");
        let bar = record_errors(&mux, "bar");
        let qux = record_errors(&mux, "qux");
        mux.substream("qux").unwrap().end().unwrap();

        mux.fail(ErrorValue::new("boom")).unwrap();

        let expected = vec!["unexpected muxdemux error: boom".to_string()];
        assert_eq!(*foo.borrow(), expected);
        assert_eq!(*bar.borrow(), expected);
        assert!(qux.borrow().is_empty());
    }

    #[test]
    fn physical_error_swallowed_without_escalation() {
        let mux = Multiplexer::new(
            Mode::Object,
            MuxOptions::default().unexpected_finish_error(false),
        );
        let foo = record_errors(&mux, "foo");
        mux.fail(ErrorValue::new("boom")).unwrap();
        assert!(foo.borrow().is_empty());
    }

    #[test]
    fn unobserved_escalation_surfaces() {
        let mux = Multiplexer::new(Mode::Object, MuxOptions::default());
        let foo = mux.substream("foo").unwrap();
        let bar = record_errors(&mux, "bar");
        let err = mux.end().unwrap_err();
        assert_eq!(err.unhandled().map(|e| e.message()), Some(UNEXPECTED_FINISH));

        // Every open substream is still escalated and closed.
        assert_eq!(*bar.borrow(), vec![UNEXPECTED_FINISH.to_string()]);
        assert!(foo.is_finished());
        assert!(foo.channel().is_finished());
        assert!(mux.substream("bar").unwrap().channel().is_finished());
    }
}
