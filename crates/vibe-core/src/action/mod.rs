//! Callback dispatch
//!
//! The multicast primitive underneath every event, lifecycle hook and open
//! notification.

mod dispatcher;

pub(crate) use dispatcher::guarded;
pub use dispatcher::{action, Action, Dispatcher, DispatcherOptions, FailureHook};
