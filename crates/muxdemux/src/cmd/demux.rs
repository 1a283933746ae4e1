use std::cell::Cell;
use std::io;
use std::rc::Rc;

use muxdemux_channel::{Arg, ChunkReader};
use muxdemux_engine::{Multiplexer, Result, SubstreamHandle};
use muxdemux_envelope::{try_decode, Decoded};
use tracing::{debug, info, trace};

use crate::cmd::{feed, DemuxArgs};
use crate::exit::{mux_error, CliError, CliResult, SUBSTREAM_ERROR, SUCCESS};
use crate::output::{print_event, OutputFormat, SubstreamEvent};

pub fn run(args: DemuxArgs, format: OutputFormat) -> CliResult<i32> {
    let mode = args.channel.mode();
    // The physical channel lives as long as stdin does.
    let options = args.channel.mux_options()?.keep_open(true);
    let demux = Multiplexer::new(mode, options);
    debug!(mux_id = demux.id(), %mode, "starting demux");

    let errors = Rc::new(Cell::new(0usize));
    let filter = Rc::new(args.substreams);
    let events = Rc::new(args.events);
    {
        let errors = Rc::clone(&errors);
        demux.on_substream(move |substream| {
            if filter.is_empty() || filter.iter().any(|name| name == substream.name()) {
                watch(&substream, &events, &errors, format)?;
            } else {
                let name = substream.name().to_string();
                let drained = name.clone();
                substream.on_data(move |_| trace!(substream = %drained, "ignored chunk"))?;
                substream.on_error(move |err| {
                    debug!(substream = %name, error = %err, "ignored substream failed");
                });
            }
            Ok(())
        });
    }

    // Forwarded chunks are always consumed, rendered or not.
    let show_passthrough = !args.no_passthrough;
    demux.on_data(move |chunk| {
        if !show_passthrough {
            return;
        }
        if let Decoded::Passthrough = try_decode(chunk, mode) {
            print_event(&SubstreamEvent::passthrough(chunk), format);
        }
    })
    .map_err(|err| mux_error("watch passthrough", err))?;

    let mut reader = ChunkReader::lines(io::stdin().lock());
    let lines = feed(&mut reader, mode, &demux)?;
    info!(lines, substreams = demux.known_substreams().len(), "input exhausted");

    match errors.get() {
        0 => Ok(SUCCESS),
        count => Err(CliError::new(
            SUBSTREAM_ERROR,
            format!("{count} substream(s) failed"),
        )),
    }
}

/// Render everything `substream` does.
fn watch(
    substream: &SubstreamHandle,
    events: &[String],
    errors: &Rc<Cell<usize>>,
    format: OutputFormat,
) -> Result<()> {
    let name: Rc<str> = Rc::from(substream.name());

    let n = Rc::clone(&name);
    substream.on_data(move |chunk| print_event(&SubstreamEvent::data(&n, chunk), format))?;

    let n = Rc::clone(&name);
    substream.on_end(move || print_event(&SubstreamEvent::named(&n, "end", &[]), format));

    let n = Rc::clone(&name);
    let errors = Rc::clone(errors);
    substream.on_error(move |err| {
        errors.set(errors.get() + 1);
        let args = [Arg::Error(err.clone())];
        print_event(&SubstreamEvent::named(&n, "error", &args), format);
    });

    for event in events.iter() {
        let n = Rc::clone(&name);
        let event_name = event.clone();
        substream.on(event, move |args| {
            print_event(&SubstreamEvent::named(&n, &event_name, args), format)
        });
    }
    Ok(())
}
