//! Request/reply correlation
//!
//! Outbound requests are tracked by a per-socket id until the peer answers
//! with a `reply` event or the socket closes. Inbound requests hand the
//! application a [`Reply`] that answers them exactly once.

use super::Socket;
use crate::action::guarded;
use crate::error::{Error, ReplyError, Result};
use crate::protocol::ReplyFrame;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Callback receiving a resolved value
pub type ResolveFn = Box<dyn FnOnce(Value) + Send>;

/// Callback receiving a rejection
pub type RejectFn = Box<dyn FnOnce(ReplyError) + Send>;

/// A request awaiting its reply
struct PendingReply {
    event: String,
    data: Value,
    on_resolve: ResolveFn,
    on_reject: RejectFn,
}

#[derive(Default)]
struct Pending {
    replies: HashMap<u64, PendingReply>,
    closed: bool,
}

/// Tracks outstanding requests of one socket
#[derive(Default)]
pub struct ReplyCorrelator {
    next_id: AtomicU64,
    pending: Mutex<Pending>,
}

impl ReplyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next frame id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store a pending reply and return its correlation id
    pub fn register(
        &self,
        event: &str,
        data: Value,
        on_resolve: ResolveFn,
        on_reject: RejectFn,
    ) -> Result<u64> {
        let id = self.next_id();
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(Error::ConnectionClosed);
        }

        pending.replies.insert(
            id,
            PendingReply {
                event: event.to_string(),
                data,
                on_resolve,
                on_reject,
            },
        );

        Ok(id)
    }

    /// Drop a pending reply without invoking its callbacks
    ///
    /// Returns the original event name and payload if it was still pending.
    pub fn forget(&self, id: u64) -> Option<(String, Value)> {
        self.pending
            .lock()
            .replies
            .remove(&id)
            .map(|pending| (pending.event, pending.data))
    }

    /// Resolve or reject the request answered by `reply`
    ///
    /// Unknown or already settled ids are rejected with
    /// `ReplyCorrelationUnknown`; a panicking callback surfaces as
    /// `CallbackFailure`.
    pub fn settle(&self, reply: ReplyFrame) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .replies
            .remove(&reply.id)
            .ok_or(Error::ReplyCorrelationUnknown(reply.id))?;

        tracing::trace!(
            reply_id = reply.id,
            event = %pending.event,
            exception = reply.exception,
            "Settling request"
        );

        let PendingReply {
            on_resolve,
            on_reject,
            ..
        } = pending;

        if reply.exception {
            guarded("reply", || on_reject(ReplyError::Rejected(reply.data)))
        } else {
            guarded("reply", || on_resolve(reply.data))
        }
    }

    /// Reject every outstanding request with `ConnectionClosed`
    ///
    /// Later registrations fail. Returns the failures of panicking reject
    /// callbacks.
    pub fn reject_all(&self) -> Vec<Error> {
        let drained: Vec<PendingReply> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.replies.drain().map(|(_, reply)| reply).collect()
        };

        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Rejecting pending replies");
        }

        drained
            .into_iter()
            .filter_map(|pending| {
                let on_reject = pending.on_reject;
                guarded("reply", || on_reject(ReplyError::ConnectionClosed)).err()
            })
            .collect()
    }

    /// Number of outstanding requests
    pub fn pending(&self) -> usize {
        self.pending.lock().replies.len()
    }
}

impl std::fmt::Debug for ReplyCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyCorrelator")
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .field("pending", &self.pending())
            .finish()
    }
}

/// Handle answering one inbound request
///
/// Clones share state: only the first `resolve` or `reject` sends a reply.
#[derive(Clone)]
pub struct Reply {
    inner: Arc<ReplyState>,
}

struct ReplyState {
    id: u64,
    socket: Weak<Socket>,
    settled: AtomicBool,
}

impl Reply {
    pub(crate) fn new(id: u64, socket: Weak<Socket>) -> Self {
        Self {
            inner: Arc::new(ReplyState {
                id,
                socket,
                settled: AtomicBool::new(false),
            }),
        }
    }

    /// Correlation id chosen by the peer
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::SeqCst)
    }

    /// Answer the request with a value
    pub fn resolve(&self, data: Value) -> Result<()> {
        self.settle(data, false)
    }

    /// Answer the request with a rejection reason
    pub fn reject(&self, reason: Value) -> Result<()> {
        self.settle(reason, true)
    }

    fn settle(&self, data: Value, exception: bool) -> Result<()> {
        if self.inner.settled.swap(true, Ordering::SeqCst) {
            tracing::debug!(reply_id = self.inner.id, "Reply already settled");
            return Ok(());
        }

        let socket = self.inner.socket.upgrade().ok_or(Error::ConnectionClosed)?;
        socket.send_reply(self.inner.id, data, exception)
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("id", &self.inner.id)
            .field("settled", &self.is_settled())
            .finish()
    }
}
