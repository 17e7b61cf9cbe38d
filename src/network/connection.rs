//! Connection handling with buffered reads
//!
//! Pre-allocated read buffer per connection. Every read is handed straight to
//! the parser, which drains it completely: complete messages go to the
//! handler, partial ones stay in the session. The buffer therefore never
//! carries bytes from one read into the next.

use std::io::{self, Read};

use tracing::debug;

use super::Session;
use crate::error::{Result, WireError};
use crate::protocol::Parser;

/// Result of one non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Read(usize),
    WouldBlock,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Totals for one `pump` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pumped {
    pub state: ConnectionState,
    pub bytes: usize,
    pub messages: usize,
}

/// Receives decoded messages from connections.
///
/// Shared by all workers, so it must be `Sync`. Any
/// `Fn(&Session, M) + Send + Sync` closure is a handler.
pub trait MessageHandler<M>: Send + Sync + 'static {
    fn on_message(&self, session: &Session, msg: M);

    /// Connection torn down; `error` is set when decoding failed.
    fn on_closed(&self, _session: &Session, _error: Option<&WireError>) {}
}

impl<M, F> MessageHandler<M> for F
where
    F: Fn(&Session, M) + Send + Sync + 'static,
{
    fn on_message(&self, session: &Session, msg: M) {
        self(session, msg)
    }
}

/// Connection wrapper owning the stream, its read buffer and its session.
pub struct Connection<S> {
    stream: S,
    session: Session,
    read_buffer: Box<[u8]>,
    read_pos: usize,
    read_len: usize,
    bytes_read: u64,
}

impl<S: Read> Connection<S> {
    pub fn new(stream: S, session: Session, buffer_size: usize) -> Self {
        Self {
            stream,
            session,
            read_buffer: vec![0u8; buffer_size].into_boxed_slice(),
            read_pos: 0,
            read_len: 0,
            bytes_read: 0,
        }
    }

    /// Read from the stream into the free part of the buffer.
    pub fn fill_read_buffer(&mut self) -> io::Result<ReadStatus> {
        // Compact
        if self.read_pos > 0 {
            let remaining = self.read_len - self.read_pos;
            if remaining > 0 {
                self.read_buffer.copy_within(self.read_pos..self.read_len, 0);
            }
            self.read_len = remaining;
            self.read_pos = 0;
        }

        loop {
            match self.stream.read(&mut self.read_buffer[self.read_len..]) {
                Ok(0) => return Ok(ReadStatus::Closed),
                Ok(n) => {
                    self.read_len += n;
                    self.bytes_read += n as u64;
                    return Ok(ReadStatus::Read(n));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadStatus::WouldBlock)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Unparsed bytes.
    #[inline(always)]
    pub fn readable(&self) -> &[u8] {
        &self.read_buffer[self.read_pos..self.read_len]
    }

    #[inline(always)]
    pub fn consume(&mut self, n: usize) {
        self.read_pos += n.min(self.read_len - self.read_pos);
    }

    /// Decode everything currently buffered, handing each message to `handler`.
    pub fn decode_available<P, H>(&mut self, parser: &P, handler: &H) -> Result<usize>
    where
        P: Parser,
        H: MessageHandler<P::Output> + ?Sized,
    {
        let available = self.read_len - self.read_pos;
        let mut cursor: &[u8] = &self.read_buffer[self.read_pos..self.read_len];
        let mut messages = 0;

        while let Some(msg) = parser.decode(&mut self.session, &mut cursor)? {
            handler.on_message(&self.session, msg);
            messages += 1;
        }

        let left = cursor.len();
        self.consume(available - left);
        Ok(messages)
    }

    /// Read and decode until the stream would block or closes.
    pub fn pump<P, H>(&mut self, parser: &P, handler: &H) -> Result<Pumped>
    where
        P: Parser,
        H: MessageHandler<P::Output> + ?Sized,
    {
        let mut bytes = 0;
        let mut messages = 0;

        loop {
            match self.fill_read_buffer()? {
                ReadStatus::Read(n) => {
                    bytes += n;
                    messages += self.decode_available(parser, handler)?;
                }
                ReadStatus::WouldBlock => {
                    return Ok(Pumped {
                        state: ConnectionState::Open,
                        bytes,
                        messages,
                    });
                }
                ReadStatus::Closed => {
                    if let Some(msg) = self.session.in_flight() {
                        debug!(
                            session = %self.session.id(),
                            kind = msg.type_name(),
                            "peer closed with a message in flight"
                        );
                    }
                    return Ok(Pumped {
                        state: ConnectionState::Closed,
                        bytes,
                        messages,
                    });
                }
            }
        }
    }

    /// Total bytes taken from the stream, including reads that failed to decode.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}
