//! Socket registry and batch commands
//!
//! A [`Server`] tracks every open socket; [`Sentence`] applies one verb to
//! all sockets, one socket by id, or the sockets carrying a set of tags.

mod registry;
mod sentence;

pub(crate) use registry::ServerShared;
pub use registry::Server;
pub use sentence::{Delivery, Selector, Sentence};
