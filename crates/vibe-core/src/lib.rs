//! # vibe-core
//!
//! Event protocol core: multicast dispatchers, sockets with request/reply
//! correlation, the socket registry and batch commands addressing it.

pub mod action;
pub mod error;
pub mod protocol;
pub mod server;
pub mod socket;

pub use action::{Action, Dispatcher, DispatcherOptions};
pub use error::{Error, ReplyError, Result};
pub use protocol::{CloseCode, EventFrame, Handshake, LongPollPhase, ReplyFrame, TransportKind};
pub use server::{Delivery, Selector, Sentence, Server};
pub use socket::{Incoming, Reply, Socket, SocketState, Transport};

#[cfg(test)]
pub(crate) mod testing;
