use std::io;

use muxdemux_channel::{ChunkReader, ChunkWriter};
use muxdemux_engine::Multiplexer;
use tracing::{debug, info, trace};

use crate::cmd::{feed, MuxArgs};
use crate::exit::{mux_error, CliResult, SUCCESS};

pub fn run(args: MuxArgs) -> CliResult<i32> {
    let mode = args.channel.mode();
    let mux = Multiplexer::new(mode, args.channel.mux_options()?);
    debug!(mux_id = mux.id(), %mode, substream = %args.substream, "starting mux");

    let stdout = ChunkWriter::lines(io::stdout());
    mux.pipe(stdout.clone())
        .map_err(|err| mux_error("pipe to stdout", err))?;

    let substream = mux
        .substream(&args.substream)
        .map_err(|err| mux_error("open substream", err))?;
    // Nothing reads the local mirror here; drain it so it never backpressures.
    substream
        .on_data(move |chunk| trace!(weight = chunk.weight(mode), "mirrored"))
        .map_err(|err| mux_error("drain substream", err))?;

    let mut reader = ChunkReader::lines(io::stdin().lock());
    let lines = feed(&mut reader, mode, &substream)?;
    info!(substream = %args.substream, lines, "input exhausted");

    // keepOpen leaves the physical channel to us.
    mux.end().map_err(|err| mux_error("end mux", err))?;
    debug!(stdout_closed = stdout.is_closed(), "mux finished");
    Ok(SUCCESS)
}
