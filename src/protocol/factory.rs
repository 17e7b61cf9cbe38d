//! Type tag registry
//!
//! Maps the one-byte wire tag to a constructor producing an empty message of
//! the right concrete type. The set of tags is closed: anything not
//! registered is a fatal decode error.

use std::collections::HashMap;

use super::message::Message;
use super::reader::NULL_TYPE;
use super::system::{
    HandshakeMessage, IoEnvelope, NodeIdMessage, RecoveryAckMessage, ENVELOPE_TYPE,
    HANDSHAKE_TYPE, NODE_ID_TYPE, RECOVERY_ACK_TYPE,
};
use crate::error::{Result, WireError};

/// Builds an empty message ready for `read_from`.
pub type Constructor = fn() -> Box<dyn Message>;

#[derive(Debug, Clone, Copy)]
struct Registration {
    name: &'static str,
    ctor: Constructor,
}

fn construct<M: Message + Default + 'static>() -> Box<dyn Message> {
    Box::new(M::default())
}

/// Registry of message constructors keyed by type tag.
#[derive(Debug, Default)]
pub struct MessageFactory {
    types: HashMap<i8, Registration>,
}

impl MessageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory preloaded with the node-to-node control messages.
    pub fn with_system_types() -> Result<Self> {
        let mut factory = Self::new();
        factory.register::<NodeIdMessage>(NODE_ID_TYPE)?;
        factory.register::<RecoveryAckMessage>(RECOVERY_ACK_TYPE)?;
        factory.register::<HandshakeMessage>(HANDSHAKE_TYPE)?;
        factory.register::<IoEnvelope>(ENVELOPE_TYPE)?;
        Ok(factory)
    }

    /// Register `M` under `tag`, constructed via `Default`.
    pub fn register<M: Message + Default + 'static>(&mut self, tag: i8) -> Result<()> {
        self.register_fn(tag, std::any::type_name::<M>(), construct::<M>)
    }

    /// Register an explicit constructor.
    ///
    /// The constructor is probed once so a message reporting a different tag
    /// than the one it is registered under is caught here, not mid-stream.
    pub fn register_fn(&mut self, tag: i8, name: &'static str, ctor: Constructor) -> Result<()> {
        if tag == NULL_TYPE {
            return Err(WireError::ReservedTag { tag });
        }
        if self.types.contains_key(&tag) {
            return Err(WireError::DuplicateType { tag });
        }
        let actual = ctor().direct_type();
        if actual != tag {
            return Err(WireError::TagMismatch { tag, actual });
        }

        self.types.insert(tag, Registration { name, ctor });
        Ok(())
    }

    /// Fresh, empty message for `tag`.
    #[inline]
    pub fn create(&self, tag: i8) -> Result<Box<dyn Message>> {
        self.types
            .get(&tag)
            .map(|reg| (reg.ctor)())
            .ok_or(WireError::UnknownType { tag })
    }

    pub fn contains(&self, tag: i8) -> bool {
        self.types.contains_key(&tag)
    }

    pub fn name_of(&self, tag: i8) -> Option<&'static str> {
        self.types.get(&tag).map(|reg| reg.name)
    }

    /// Registered tags in ascending order.
    pub fn tags(&self) -> Vec<i8> {
        let mut tags: Vec<i8> = self.types.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
