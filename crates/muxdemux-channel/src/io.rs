use std::cell::{Cell, RefCell};
use std::io::{ErrorKind, Read, Write};
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

use crate::chunk::{Arg, Chunk};
use crate::error::{ChannelError, Result};
use crate::traits::{DrainCallback, Writable};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Where one chunk ends and the next begins on a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boundary {
    /// Whatever a single `read` returns is one chunk.
    #[default]
    Read,
    /// Chunks are newline-terminated lines. The newline is not part of the
    /// chunk.
    Newline,
}

/// Reads chunks from any `Read` stream.
pub struct ChunkReader<T> {
    inner: T,
    buf: BytesMut,
    boundary: Boundary,
    eof: bool,
}

impl<T: Read> ChunkReader<T> {
    /// Reader that yields one chunk per successful read.
    pub fn new(inner: T) -> Self {
        Self::with_boundary(inner, Boundary::Read)
    }

    /// Reader that yields one chunk per line.
    pub fn lines(inner: T) -> Self {
        Self::with_boundary(inner, Boundary::Newline)
    }

    pub fn with_boundary(inner: T, boundary: Boundary) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            boundary,
            eof: false,
        }
    }

    /// Read the next chunk (blocking). Returns `Ok(None)` at end of stream.
    ///
    /// In line mode, empty lines are skipped and an unterminated final line
    /// is returned as the last chunk.
    pub fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(chunk) = self.take_buffered() {
                return Ok(Some(chunk));
            }
            if self.eof {
                return Ok(None);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            };

            if read == 0 {
                self.eof = true;
                continue;
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn take_buffered(&mut self) -> Option<Bytes> {
        loop {
            if self.buf.is_empty() {
                return None;
            }
            let line = match self.boundary {
                Boundary::Read => return Some(self.buf.split().freeze()),
                Boundary::Newline => match self.buf.iter().position(|b| *b == b'\n') {
                    Some(at) => {
                        let mut line = self.buf.split_to(at + 1);
                        line.truncate(at);
                        line
                    }
                    None if self.eof => self.buf.split(),
                    None => return None,
                },
            };
            if !line.is_empty() {
                return Some(line.freeze());
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }
}

struct WriterState<T> {
    inner: T,
    boundary: Boundary,
    closed: bool,
}

/// A [`Writable`] sink that serializes chunks onto any `Write` stream.
///
/// Object chunks are written as JSON text. Clones share the same stream.
pub struct ChunkWriter<T> {
    state: Rc<RefCell<WriterState<T>>>,
}

impl<T> Clone for ChunkWriter<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: Write> ChunkWriter<T> {
    /// Writer that emits chunks back to back.
    pub fn new(inner: T) -> Self {
        Self::with_boundary(inner, Boundary::Read)
    }

    /// Writer that terminates every chunk with a newline.
    pub fn lines(inner: T) -> Self {
        Self::with_boundary(inner, Boundary::Newline)
    }

    pub fn with_boundary(inner: T, boundary: Boundary) -> Self {
        Self {
            state: Rc::new(RefCell::new(WriterState {
                inner,
                boundary,
                closed: false,
            })),
        }
    }

    /// Serialize and write one chunk (blocking).
    pub fn send(&self, chunk: &Chunk) -> Result<()> {
        let mut payload = match chunk {
            Chunk::Bytes(bytes) => bytes.to_vec(),
            Chunk::Object(value) => serde_json::to_vec(value)?,
        };

        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(ChannelError::WriteAfterEnd);
        }
        if state.boundary == Boundary::Newline {
            payload.push(b'\n');
        }

        let mut offset = 0usize;
        while offset < payload.len() {
            match state.inner.write(&payload[offset..]) {
                Ok(0) => return Err(ChannelError::SinkClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }

        flush(&mut state.inner)
    }

    /// Run `f` with the underlying stream borrowed.
    pub fn with_inner<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.borrow().inner)
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Recover the stream if this is the last handle.
    pub fn into_inner(self) -> Option<T> {
        Rc::try_unwrap(self.state)
            .ok()
            .map(|state| state.into_inner().inner)
    }
}

fn flush<T: Write>(inner: &mut T) -> Result<()> {
    loop {
        match inner.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(ChannelError::Io(err)),
        }
    }
}

impl<T: Write> Writable for ChunkWriter<T> {
    fn write(&self, chunk: Chunk) -> Result<bool> {
        self.send(&chunk)?;
        Ok(true)
    }

    fn end(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        flush(&mut state.inner)
    }

    fn emit(&self, _event: &str, _args: Vec<Arg>) -> Result<bool> {
        Ok(false)
    }

    fn once_drain(&self, callback: DrainCallback) -> Result<()> {
        callback()
    }
}

/// Feed every chunk from `reader` into `dest`, then end it.
///
/// Returns the number of chunks written. Stops with
/// [`ChannelError::Stalled`] instead of reading further when `dest` stays
/// backpressured.
pub fn pump<T: Read>(reader: &mut ChunkReader<T>, dest: &dyn Writable) -> Result<usize> {
    let mut count = 0usize;
    while let Some(bytes) = reader.read_chunk()? {
        let ready = dest.write(Chunk::Bytes(bytes))?;
        count += 1;
        if !ready {
            wait_for_drain(dest)?;
        }
    }
    tracing::debug!(chunks = count, "input exhausted, ending destination");
    dest.end()?;
    Ok(count)
}

/// Check that `dest` drains after reporting backpressure.
///
/// Consumers run synchronously inside `write`, so a destination that has not
/// drained by the time its drain callback is registered has nobody left to
/// drain it.
pub fn wait_for_drain(dest: &dyn Writable) -> Result<()> {
    let drained = Rc::new(Cell::new(false));
    let flag = Rc::clone(&drained);
    dest.once_drain(Box::new(move || {
        flag.set(true);
        Ok(())
    }))?;
    if drained.get() {
        Ok(())
    } else {
        tracing::debug!("destination still backpressured, stopping input");
        Err(ChannelError::Stalled)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use serde_json::json;

    use super::*;
    use crate::channel::{Channel, ChannelConfig};

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptOnce {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptOnce {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::new(ErrorKind::Interrupted, "signal"));
            }
            self.inner.read(buf)
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn lines_split_on_newline() {
        let mut reader = ChunkReader::lines(Cursor::new(b"one\n\ntwo\nthree".to_vec()));
        assert_eq!(reader.read_chunk().unwrap().unwrap().as_ref(), b"one");
        assert_eq!(reader.read_chunk().unwrap().unwrap().as_ref(), b"two");
        assert_eq!(reader.read_chunk().unwrap().unwrap().as_ref(), b"three");
        assert!(reader.read_chunk().unwrap().is_none());
    }

    #[test]
    fn lines_survive_partial_reads() {
        let mut reader = ChunkReader::lines(ByteByByteReader {
            bytes: b"slow\nline\n".to_vec(),
            pos: 0,
        });
        assert_eq!(reader.read_chunk().unwrap().unwrap().as_ref(), b"slow");
        assert_eq!(reader.read_chunk().unwrap().unwrap().as_ref(), b"line");
        assert!(reader.read_chunk().unwrap().is_none());
    }

    #[test]
    fn interrupted_reads_retry() {
        let mut reader = ChunkReader::new(InterruptOnce {
            interrupted: false,
            inner: Cursor::new(b"data".to_vec()),
        });
        assert_eq!(reader.read_chunk().unwrap().unwrap().as_ref(), b"data");
        assert!(reader.read_chunk().unwrap().is_none());
    }

    #[test]
    fn writer_frames_lines_and_objects() {
        let writer = ChunkWriter::lines(Vec::new());
        writer.send(&Chunk::from("raw")).unwrap();
        writer.send(&Chunk::Object(json!({ "a": 1 }))).unwrap();
        let written = writer.into_inner().unwrap();
        assert_eq!(written, b"raw\n{\"a\":1}\n");
    }

    #[test]
    fn zero_length_write_is_sink_closed() {
        let writer = ChunkWriter::new(ZeroWriter);
        let err = writer.send(&Chunk::from("x")).unwrap_err();
        assert!(matches!(err, ChannelError::SinkClosed));
    }

    #[test]
    fn writer_rejects_after_end() {
        let writer = ChunkWriter::new(Vec::new());
        Writable::end(&writer).unwrap();
        Writable::end(&writer).unwrap();
        assert!(writer.is_closed());
        let err = Writable::write(&writer, Chunk::from("late")).unwrap_err();
        assert!(matches!(err, ChannelError::WriteAfterEnd));
    }

    #[test]
    fn pump_feeds_channel_into_writer() {
        let channel = Channel::new(ChannelConfig::bytes());
        let out = ChunkWriter::lines(Vec::new());
        channel.pipe(out.clone()).unwrap();

        let mut reader = ChunkReader::lines(Cursor::new(b"a\nb\n".to_vec()));
        let count = pump(&mut reader, &channel).unwrap();

        assert_eq!(count, 2);
        assert!(channel.is_ended());
        assert!(out.is_closed());
        assert_eq!(out.with_inner(|buf| buf.clone()), b"a\nb\n");
    }

    #[test]
    fn pump_stops_at_unread_high_water_mark() {
        let channel = Channel::new(ChannelConfig::bytes().with_high_water_mark(10));
        let input = "0123\n".repeat(100);
        let mut reader = ChunkReader::lines(Cursor::new(input.into_bytes()));

        let err = pump(&mut reader, &channel).unwrap_err();
        assert!(matches!(err, ChannelError::Stalled));
        assert_eq!(channel.buffered(), 12);
        assert!(!channel.is_ending());

        // The rest of the input is still unread.
        assert!(reader.read_chunk().unwrap().is_some());
    }
}
