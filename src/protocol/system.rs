//! Node-to-node control messages
//!
//! Exchanged by peers when a connection is (re)established and to wrap
//! application payloads. Negative tags are reserved for this layer.

use bytes::Buf;
use uuid::Uuid;

use super::message::Message;
use super::reader::MessageReader;
use crate::error::Result;
use crate::field;

pub const NODE_ID_TYPE: i8 = -1;
pub const RECOVERY_ACK_TYPE: i8 = -2;
pub const HANDSHAKE_TYPE: i8 = -3;
pub const ENVELOPE_TYPE: i8 = 8;

/// Identifies the sending node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIdMessage {
    pub node_id: Uuid,
}

impl Message for NodeIdMessage {
    fn direct_type(&self) -> i8 {
        NODE_ID_TYPE
    }

    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
        loop {
            match reader.state() {
                0 => self.node_id = field!(reader.read_uuid(buf)),
                _ => return Ok(true),
            }
            reader.increment_state();
        }
    }
}

/// Count of messages the peer has received, for resend after reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryAckMessage {
    pub received: i64,
}

impl Message for RecoveryAckMessage {
    fn direct_type(&self) -> i8 {
        RECOVERY_ACK_TYPE
    }

    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
        loop {
            match reader.state() {
                0 => self.received = field!(reader.read_i64(buf)),
                _ => return Ok(true),
            }
            reader.increment_state();
        }
    }
}

/// First message on every connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub node_id: Uuid,
    pub received: i64,
    pub connect_count: i64,
}

impl Message for HandshakeMessage {
    fn direct_type(&self) -> i8 {
        HANDSHAKE_TYPE
    }

    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
        loop {
            match reader.state() {
                0 => self.node_id = field!(reader.read_uuid(buf)),
                1 => self.received = field!(reader.read_i64(buf)),
                2 => self.connect_count = field!(reader.read_i64(buf)),
                _ => return Ok(true),
            }
            reader.increment_state();
        }
    }
}

/// Routes an application message to a topic.
///
/// `payload` is any registered message, written with its own tag.
#[derive(Debug, Default)]
pub struct IoEnvelope {
    pub topic: Option<String>,
    pub ordered: bool,
    pub timeout_ms: i64,
    pub payload: Option<Box<dyn Message>>,
}

impl Message for IoEnvelope {
    fn direct_type(&self) -> i8 {
        ENVELOPE_TYPE
    }

    fn read_from(&mut self, buf: &mut dyn Buf, reader: &mut MessageReader) -> Result<bool> {
        loop {
            match reader.state() {
                0 => self.topic = field!(reader.read_string(buf)?),
                1 => self.ordered = field!(reader.read_bool(buf)),
                2 => self.timeout_ms = field!(reader.read_i64(buf)),
                3 => self.payload = field!(reader.read_message(buf)?),
                _ => return Ok(true),
            }
            reader.increment_state();
        }
    }
}
