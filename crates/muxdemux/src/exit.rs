use std::fmt;
use std::io;

use muxdemux_channel::ChannelError;
use muxdemux_engine::MuxError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const SUBSTREAM_ERROR: i32 = 2;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::BrokenPipe => FAILURE,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Io(source) => io_error(context, source),
        ChannelError::Unhandled(err) => CliError::new(
            SUBSTREAM_ERROR,
            format!("{context}: unhandled substream error: {}", err.message()),
        ),
        ChannelError::InvalidChunk { .. } | ChannelError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ChannelError::SinkClosed
        | ChannelError::Stalled
        | ChannelError::WriteAfterEnd
        | ChannelError::PushAfterEof => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Channel(err) => channel_error(context, err),
        MuxError::Json(_) => CliError::new(USAGE, format!("{context}: {err}")),
        MuxError::Envelope(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        MuxError::SubstreamFinished(_) | MuxError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}
