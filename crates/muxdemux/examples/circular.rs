//! Two multiplexers wired into each other, each answering the other.
//!
//! Usage:
//!   cargo run -p muxdemux --example circular

use std::error::Error;

use muxdemux::{Chunk, Mode, Multiplexer, MuxOptions};

fn text(chunk: &Chunk) -> String {
    match chunk {
        Chunk::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Chunk::Object(value) => value.to_string(),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let client = Multiplexer::new(Mode::Bytes, MuxOptions::default().with_id("client").circular(true));
    let server = Multiplexer::new(Mode::Bytes, MuxOptions::default().with_id("server").circular(true));

    client.on_substream(|substream| {
        if substream.name() == "pong" {
            substream.on_data(|chunk| println!("client <- pong: {}", text(chunk)))?;
        }
        Ok(())
    });

    client.pipe(server.clone())?;
    server.pipe(client.clone())?;

    let pong = server.substream("pong")?;
    server.on_substream(move |substream| {
        if substream.name() != "ping" {
            return Ok(());
        }
        let reply = pong.clone();
        substream.on_data(move |chunk| {
            println!("server <- ping: {}", text(chunk));
            if let Err(err) = reply.write(text(chunk).to_uppercase()) {
                eprintln!("reply failed: {err}");
            }
        })?;
        let reply = pong.clone();
        substream.on_end(move || {
            if let Err(err) = reply.end() {
                eprintln!("closing pong failed: {err}");
            }
        });
        Ok(())
    });

    let ping = client.substream("ping")?;
    ping.write("hello")?;
    ping.write("again")?;
    ping.end()?;

    println!(
        "client finished: {}, server finished: {}",
        client.is_finished(),
        server.is_finished()
    );
    Ok(())
}
