//! Wire protocol definitions
//!
//! Event frames, the handshake carried on the connect URI, and close codes.

mod close_codes;
mod frame;
mod handshake;

pub use close_codes::CloseCode;
pub use frame::{EventFrame, ReplyFrame, REPLY_EVENT};
pub use handshake::{Handshake, LongPollPhase, TransportKind};
