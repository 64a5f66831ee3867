//! Sockets
//!
//! A socket wraps one transport connection: event handlers, request/reply
//! correlation, tags and the close lifecycle.

mod reply;
mod socket;

pub use reply::{RejectFn, Reply, ReplyCorrelator, ResolveFn};
pub use socket::{Incoming, Socket, SocketState, Transport};
