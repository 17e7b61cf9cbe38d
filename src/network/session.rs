//! Per-connection decode state
//!
//! A session carries exactly two slots: the reader cursor and the message
//! currently in flight. Both are owned by the session and lent to the parser
//! for the duration of one `decode` call.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::protocol::{Message, MessageReader};

/// Connection identifier, unique per server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The decoder's view of one connection.
///
/// Decoding takes `&mut Session`, so two threads can never decode the same
/// session at once; distinct sessions share nothing and decode in parallel.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    created_at: Instant,
    messages_decoded: u64,
    reader: Option<MessageReader>,
    in_flight: Option<Box<dyn Message>>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            peer: None,
            created_at: Instant::now(),
            messages_decoded: 0,
            reader: None,
            in_flight: None,
        }
    }

    pub fn with_peer(id: SessionId, peer: SocketAddr) -> Self {
        Self {
            peer: Some(peer),
            ..Self::new(id)
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Messages completed on this session so far.
    pub fn messages_decoded(&self) -> u64 {
        self.messages_decoded
    }

    /// Reader cursor, absent until the first field is decoded.
    pub fn reader(&self) -> Option<&MessageReader> {
        self.reader.as_ref()
    }

    /// Partially decoded message waiting for more bytes.
    pub fn in_flight(&self) -> Option<&dyn Message> {
        self.in_flight.as_deref()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn reader_or_insert_with(
        &mut self,
        init: impl FnOnce() -> MessageReader,
    ) -> &mut MessageReader {
        self.reader.get_or_insert_with(init)
    }

    pub(crate) fn take_in_flight(&mut self) -> Option<Box<dyn Message>> {
        self.in_flight.take()
    }

    pub(crate) fn put_in_flight(&mut self, msg: Box<dyn Message>) {
        debug_assert!(self.in_flight.is_none(), "second message in flight");
        self.in_flight = Some(msg);
    }

    pub(crate) fn record_decoded(&mut self) {
        self.messages_decoded += 1;
    }
}
