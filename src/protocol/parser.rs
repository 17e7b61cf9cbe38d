//! Incremental decoder for direct messages.
//!
//! Called by the owning connection each time bytes arrive. Per session and
//! per message the decoder walks:
//!
//! ```text
//! NoMessage --tag byte--> Decoding --fields--> Complete --reset reader--> NoMessage
//!                            ^   |
//!                            +---+ buffer exhausted, message parked in session
//! ```
//!
//! Nothing frames a message on the wire; the message decides when it is
//! complete. The decoder never buffers bytes itself: partial state lives in
//! the session's reader and in the parked message.

use std::sync::Arc;

use bytes::{Buf, Bytes};
use tracing::{error, trace};

use super::factory::MessageFactory;
use super::message::Message;
use super::reader::MessageReader;
use crate::config::ReaderLimits;
use crate::error::{Result, WireError};
use crate::network::Session;

/// Shared parser interface for connection pipelines.
pub trait Parser {
    type Output;

    /// Decode at most one message from `buf`.
    ///
    /// Returns `Ok(None)` once the buffer is exhausted without completing a
    /// message. Calls for one session must be serialized.
    fn decode(&self, session: &mut Session, buf: &mut dyn Buf) -> Result<Option<Self::Output>>;

    /// Serialize `msg` for sending.
    fn encode(&self, session: &Session, msg: &Self::Output) -> Result<Bytes>;
}

/// Parser for tag-prefixed, self-describing messages.
#[derive(Debug, Clone)]
pub struct DirectParser {
    factory: Arc<MessageFactory>,
    limits: ReaderLimits,
}

impl DirectParser {
    pub fn new(factory: Arc<MessageFactory>) -> Self {
        Self::with_limits(factory, ReaderLimits::default())
    }

    pub fn with_limits(factory: Arc<MessageFactory>, limits: ReaderLimits) -> Self {
        Self { factory, limits }
    }

    pub fn factory(&self) -> &Arc<MessageFactory> {
        &self.factory
    }
}

impl Parser for DirectParser {
    type Output = Box<dyn Message>;

    fn decode(&self, session: &mut Session, buf: &mut dyn Buf) -> Result<Option<Self::Output>> {
        let mut msg = match session.take_in_flight() {
            Some(msg) => msg,
            None => {
                if !buf.has_remaining() {
                    return Ok(None);
                }
                let tag = buf.get_i8();
                let msg = self.factory.create(tag)?;
                trace!(session = %session.id(), tag, kind = msg.type_name(), "message started");
                msg
            }
        };

        if !buf.has_remaining() {
            session.put_in_flight(msg);
            return Ok(None);
        }

        let tag = msg.direct_type();
        let reader = session.reader_or_insert_with(|| {
            MessageReader::new(Arc::clone(&self.factory), self.limits)
        });
        reader.set_current_type(tag);

        if msg.read_from(buf, reader)? {
            if !reader.is_settled() {
                return Err(WireError::FramingViolation {
                    tag,
                    reason: "message completed with a field partially read",
                });
            }
            reader.reset();
            session.record_decoded();
            trace!(session = %session.id(), tag, remaining = buf.remaining(), "message complete");
            Ok(Some(msg))
        } else {
            if buf.has_remaining() {
                return Err(WireError::FramingViolation {
                    tag,
                    reason: "message stopped before consuming the buffer",
                });
            }
            session.put_in_flight(msg);
            Ok(None)
        }
    }

    fn encode(&self, session: &Session, msg: &Self::Output) -> Result<Bytes> {
        error!(
            session = %session.id(),
            tag = msg.direct_type(),
            "encode called on direct parser; direct messages write themselves"
        );
        Err(WireError::Unsupported)
    }
}
