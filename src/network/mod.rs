//! Network layer: connections feeding the decoder
//!
//! Uses mio for non-blocking I/O. One acceptor distributes sockets across
//! worker event loops; every connection owns its session, so decode state is
//! never shared between threads.

mod connection;
pub mod server;
mod session;
mod stats;

pub use connection::{Connection, ConnectionState, MessageHandler, Pumped, ReadStatus};
pub use server::ServerHandle;
pub use session::{Session, SessionId};
pub use stats::{NodeStats, StatsSnapshot};
