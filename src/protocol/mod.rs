//! Protocol layer: direct message decoding
//!
//! Design:
//! - No framing: each message type knows its own field sequence
//! - Resumable: partial fields live in a per-session reader, never re-read
//! - Closed type set: tags resolve through a registry, unknown tags are fatal

mod factory;
mod message;
mod parser;
mod reader;
pub mod system;

pub use factory::{Constructor, MessageFactory};
pub use message::{AsAny, Message};
pub use parser::{DirectParser, Parser};
pub use reader::{MessageReader, Progress, NULL_LENGTH, NULL_TYPE};
