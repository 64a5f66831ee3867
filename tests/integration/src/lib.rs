//! Integration test utilities for the vibe gateway
//!
//! This crate provides helpers for running end-to-end tests against the
//! WebSocket and long polling endpoints.

pub mod helpers;

pub use helpers::*;
