//! Multiplex two substreams and demultiplex them on the other side.
//!
//! Usage:
//!   cargo run -p muxdemux --example round-trip

use std::error::Error;

use muxdemux::envelope::{try_decode, Decoded};
use muxdemux::{Chunk, Mode, Multiplexer, MuxOptions};

fn main() -> Result<(), Box<dyn Error>> {
    let mux = Multiplexer::new(Mode::Bytes, MuxOptions::default().with_id("left"));
    let demux = Multiplexer::with_handler(Mode::Bytes, MuxOptions::default(), |substream| {
        let name = substream.name().to_string();
        let tag = name.clone();
        substream.on_data(move |chunk| {
            if let Chunk::Bytes(bytes) = chunk {
                println!("  [{tag}] {}", String::from_utf8_lossy(bytes));
            }
        })?;
        substream.on_end(move || println!("  [{name}] end"));
        Ok(())
    });

    // The demultiplexer forwards what it receives; show it as wire traffic.
    demux.on_data(|chunk| {
        let kind = match try_decode(chunk, Mode::Bytes) {
            Decoded::Envelope(_) => "envelope",
            Decoded::Passthrough => "raw",
        };
        if let Chunk::Bytes(bytes) = chunk {
            println!("{kind:>8}: {}", String::from_utf8_lossy(bytes));
        }
    })?;
    demux.on_finish(|| println!("demux finished"));

    mux.pipe(demux.clone())?;

    let logs = mux.substream("logs")?;
    let metrics = mux.substream("metrics")?;
    logs.write("starting")?;
    metrics.write("cpu=12")?;
    mux.write("not an envelope")?;
    logs.write("ready")?;

    logs.end()?;
    metrics.end()?;

    println!(
        "mux finished: {}, demux knows: {:?}",
        mux.is_finished(),
        demux.known_substreams()
    );
    Ok(())
}
