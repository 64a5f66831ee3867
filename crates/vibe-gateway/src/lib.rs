//! # vibe-gateway
//!
//! Serves sockets over WebSocket and HTTP long polling.

pub mod bridge;
pub mod server;
