//! Gridwire - incremental decoder for direct node-to-node messages
//!
//! Messages arrive on a stream with no outer framing: a one-byte type tag,
//! then whatever fields that type reads. Bytes can arrive split at any point;
//! the decoder resumes exactly where the previous chunk stopped.
//!
//! Layout:
//! - `protocol`: message trait, type registry, resumable field reader, parser
//! - `network`: per-connection sessions and a mio server that feeds them
//! - `config`: node and reader configuration
//! - `error`: the crate error type

pub mod config;
pub mod error;
pub mod network;
pub mod protocol;

pub use config::{NodeConfig, ReaderLimits};
pub use error::{Result, WireError};
pub use network::{Session, SessionId};
pub use protocol::{DirectParser, Message, MessageFactory, MessageReader, Parser, Progress};
