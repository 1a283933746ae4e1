use std::io::Read;

use clap::{Args, Subcommand};
use muxdemux_channel::{pump, wait_for_drain, Chunk, ChunkReader, Mode, Writable};
use muxdemux_engine::MuxOptions;

use crate::exit::{channel_error, mux_error, CliError, CliResult, DATA_INVALID};
use crate::output::OutputFormat;

pub mod demux;
pub mod mux;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wrap stdin lines as one substream and print envelope lines.
    Mux(MuxArgs),
    /// Read envelope lines from stdin and print per-substream events.
    Demux(DemuxArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Mux(args) => mux::run(args),
        Command::Demux(args) => demux::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

/// Options shared by `mux` and `demux`.
#[derive(Args, Debug, Default)]
pub struct ChannelArgs {
    /// Carry JSON values instead of bytes. Each input line must be JSON.
    #[arg(long)]
    pub object: bool,
    /// Instance id stamped on outgoing envelopes.
    #[arg(long)]
    pub id: Option<String>,
    /// Multiplexer options as a JSON object (keys: id, circular, keepOpen,
    /// unexpectedFinishError, highWaterMark).
    #[arg(long, value_name = "JSON", env = "MUXDEMUX_OPTIONS")]
    pub options: Option<String>,
    /// Do not raise errors on substreams left open when input ends.
    #[arg(long)]
    pub no_finish_error: bool,
}

impl ChannelArgs {
    pub fn mode(&self) -> Mode {
        if self.object {
            Mode::Object
        } else {
            Mode::Bytes
        }
    }

    pub fn mux_options(&self) -> CliResult<MuxOptions> {
        let mut options = match &self.options {
            Some(text) => MuxOptions::from_json(text).map_err(|err| mux_error("--options", err))?,
            None => MuxOptions::default(),
        };
        if let Some(id) = &self.id {
            options = options.with_id(id.clone());
        }
        if self.no_finish_error {
            options = options.unexpected_finish_error(false);
        }
        Ok(options)
    }
}

#[derive(Args, Debug)]
pub struct MuxArgs {
    /// Substream name for the input lines.
    #[arg(long, short = 's', value_name = "NAME")]
    pub substream: String,
    #[command(flatten)]
    pub channel: ChannelArgs,
}

#[derive(Args, Debug)]
pub struct DemuxArgs {
    /// Only render these substreams (repeatable). Default: all.
    #[arg(long = "substream", short = 's', value_name = "NAME")]
    pub substreams: Vec<String>,
    /// Also render these named events (repeatable).
    #[arg(long = "event", short = 'e', value_name = "EVENT")]
    pub events: Vec<String>,
    /// Do not render chunks that are not envelopes.
    #[arg(long)]
    pub no_passthrough: bool,
    #[command(flatten)]
    pub channel: ChannelArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Feed every input line into `dest` as a chunk, then end it.
///
/// In object mode each line is parsed as JSON first.
pub(crate) fn feed<R: Read>(
    reader: &mut ChunkReader<R>,
    mode: Mode,
    dest: &dyn Writable,
) -> CliResult<usize> {
    if mode == Mode::Bytes {
        return pump(reader, dest).map_err(|err| channel_error("feed input", err));
    }

    let mut count = 0usize;
    while let Some(line) = reader
        .read_chunk()
        .map_err(|err| channel_error("read input", err))?
    {
        count += 1;
        let value: serde_json::Value = serde_json::from_slice(&line).map_err(|err| {
            CliError::new(DATA_INVALID, format!("input line {count}: {err}"))
        })?;
        let ready = dest
            .write(Chunk::Object(value))
            .map_err(|err| channel_error("feed input", err))?;
        if !ready {
            wait_for_drain(dest).map_err(|err| channel_error("feed input", err))?;
        }
    }
    tracing::debug!(lines = count, "input exhausted");
    dest.end().map_err(|err| channel_error("end input", err))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use muxdemux_channel::{Channel, ChannelConfig};
    use serde_json::json;

    use super::*;

    fn collect(channel: &Channel) -> std::rc::Rc<std::cell::RefCell<Vec<Chunk>>> {
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = std::rc::Rc::clone(&seen);
        channel
            .on_data(move |chunk| sink.borrow_mut().push(chunk.clone()))
            .unwrap();
        seen
    }

    #[test]
    fn object_lines_are_parsed() {
        let channel = Channel::new(ChannelConfig::objects());
        let seen = collect(&channel);
        let mut reader = ChunkReader::lines(Cursor::new("{\"a\":1}\n\n2\n"));

        assert_eq!(feed(&mut reader, Mode::Object, &channel).unwrap(), 2);
        assert_eq!(
            *seen.borrow(),
            vec![Chunk::Object(json!({ "a": 1 })), Chunk::Object(json!(2))]
        );
        assert!(channel.is_finished());
    }

    #[test]
    fn invalid_object_line_is_data_error() {
        let channel = Channel::new(ChannelConfig::objects());
        let mut reader = ChunkReader::lines(Cursor::new("1\nnope\n"));
        let err = feed(&mut reader, Mode::Object, &channel).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.starts_with("input line 2"));
    }

    #[test]
    fn unread_object_input_stops_feeding() {
        let channel = Channel::new(ChannelConfig::objects().with_high_water_mark(2));
        let mut reader = ChunkReader::lines(Cursor::new("1\n2\n3\n4\n"));
        let err = feed(&mut reader, Mode::Object, &channel).unwrap_err();
        assert_eq!(err.code, crate::exit::FAILURE);
        assert_eq!(channel.buffered(), 2);
        assert!(!channel.is_ending());
    }

    #[test]
    fn options_flags_override_json() {
        let args = ChannelArgs {
            options: Some(r#"{"id":"from-json","keepOpen":true}"#.to_string()),
            id: Some("from-flag".to_string()),
            no_finish_error: true,
            ..ChannelArgs::default()
        };
        let options = args.mux_options().unwrap();
        assert_eq!(options.id.as_deref(), Some("from-flag"));
        assert!(options.keep_open);
        assert!(!options.unexpected_finish_error);
    }
}
