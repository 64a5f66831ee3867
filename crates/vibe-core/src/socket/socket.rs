//! Individual socket
//!
//! One addressable, tagged endpoint with named event handlers, request/reply
//! correlation and a one-way `Open → Closing → Closed` lifecycle.

use super::reply::{ReplyCorrelator, Reply};
use crate::action::{action, Action, Dispatcher, DispatcherOptions, FailureHook};
use crate::error::{Error, ReplyError, Result};
use crate::protocol::{EventFrame, Handshake};
use crate::server::ServerShared;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::oneshot;

/// Socket lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketState {
    /// Accepting sends and dispatching events
    Open,
    /// Close requested, waiting for the transport to terminate
    Closing,
    /// Terminated; never reopens
    Closed,
}

/// Outbound half of the transport a socket is bound to
pub trait Transport: Send + Sync {
    /// Queue one encoded frame; must not block on network I/O
    fn send(&self, text: String) -> Result<()>;

    /// Begin terminating the transport
    ///
    /// Termination is confirmed later through [`Socket::handle_closed`].
    fn close(&self);
}

/// An inbound event as seen by handlers
#[derive(Debug, Clone)]
pub struct Incoming {
    event: String,
    data: Value,
    reply: Option<Reply>,
}

impl Incoming {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Present when the peer expects an answer
    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }
}

/// A single socket
pub struct Socket {
    /// Unique socket ID
    id: String,

    /// URI the socket was reached through
    uri: String,

    /// Current lifecycle state
    state: RwLock<SocketState>,

    /// Tag names, mirrored in the server's tag index while registered
    pub(crate) tags: RwLock<BTreeSet<String>>,

    /// Server this socket is registered with
    pub(crate) binding: RwLock<Option<Weak<ServerShared>>>,

    /// Outbound transport
    transport: Arc<dyn Transport>,

    /// Event name to handlers, created on first `on`
    handlers: DashMap<String, Arc<Dispatcher<Incoming>>>,

    /// Outstanding requests
    replies: ReplyCorrelator,

    error_actions: Dispatcher<Arc<Error>>,
    close_actions: Dispatcher<()>,
    anomaly_actions: Dispatcher<Arc<Error>>,

    me: Weak<Socket>,
    created_at: Instant,
}

impl Socket {
    /// Create a new open socket bound to `transport`
    pub fn new<I, S>(
        id: impl Into<String>,
        uri: impl Into<String>,
        tags: I,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        let tags = tags.into_iter().map(Into::into).collect();

        Arc::new_cyclic(|me: &Weak<Socket>| {
            let error_actions = Dispatcher::new(
                format!("{id}/error"),
                DispatcherOptions::new().once().memory(),
            );
            let escalate = me.clone();
            error_actions.add(action(move |_: &Arc<Error>| {
                if let Some(socket) = escalate.upgrade() {
                    socket.close();
                }
            }));

            Self {
                close_actions: Dispatcher::new(
                    format!("{id}/close"),
                    DispatcherOptions::new().once().memory(),
                ),
                anomaly_actions: Dispatcher::new(format!("{id}/anomaly"), DispatcherOptions::new()),
                error_actions,
                id,
                uri: uri.into(),
                state: RwLock::new(SocketState::Open),
                tags: RwLock::new(tags),
                binding: RwLock::new(None),
                transport,
                handlers: DashMap::new(),
                replies: ReplyCorrelator::new(),
                me: me.clone(),
                created_at: Instant::now(),
            }
        })
    }

    /// Create a socket from a parsed handshake
    pub fn from_handshake(
        handshake: &Handshake,
        uri: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Arc<Self> {
        Self::new(
            handshake.id.clone(),
            uri,
            handshake.tags.iter().cloned(),
            transport,
        )
    }

    /// Get the socket ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the URI used to connect
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Get the current state
    pub fn state(&self) -> SocketState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SocketState::Open
    }

    /// Get socket age
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Snapshot of the tag set
    pub fn tags(&self) -> BTreeSet<String> {
        self.tags.read().clone()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.read().contains(tag)
    }

    /// Add tags
    pub fn tag<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        self.retag(move |tags| tags.extend(names));
    }

    /// Remove tags
    pub fn untag<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|s| s.as_ref().to_string()).collect();
        self.retag(move |tags| {
            for name in &names {
                tags.remove(name);
            }
        });
    }

    fn retag<F>(&self, apply: F)
    where
        F: FnOnce(&mut BTreeSet<String>),
    {
        let binding = self.binding.read();
        match binding.as_ref().and_then(Weak::upgrade) {
            Some(server) => {
                drop(binding);
                server.retag(self, apply);
            }
            None => apply(&mut self.tags.write()),
        }
    }

    /// Register a handler for `event`, returning the handle `off` accepts
    pub fn on<F>(&self, event: &str, f: F) -> Action<Incoming>
    where
        F: Fn(&Incoming) + Send + Sync + 'static,
    {
        let handler = action(f);
        self.on_action(event, handler.clone());
        handler
    }

    /// Register an existing action for `event`
    pub fn on_action(&self, event: &str, handler: Action<Incoming>) {
        let dispatcher = Arc::clone(
            self.handlers
                .entry(event.to_string())
                .or_insert_with(|| Arc::new(self.event_dispatcher(event)))
                .value(),
        );

        if self.state() == SocketState::Closed {
            dispatcher.disable();
        }
        dispatcher.add(handler);
    }

    /// Remove a handler for `event`
    pub fn off(&self, event: &str, handler: &Action<Incoming>) {
        let dispatcher = self.handlers.get(event).map(|entry| Arc::clone(entry.value()));
        if let Some(dispatcher) = dispatcher {
            dispatcher.remove(handler);
        }
    }

    fn event_dispatcher(&self, event: &str) -> Dispatcher<Incoming> {
        let me = self.me.clone();
        let hook: FailureHook = Arc::new(move |err| {
            if let Some(socket) = me.upgrade() {
                socket.report(err);
            }
        });

        Dispatcher::new(format!("{}/{event}", self.id), DispatcherOptions::new())
            .with_failure_hook(hook)
    }

    /// Called once the socket has closed
    pub fn on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close_actions.add(action(move |(): &()| f()));
    }

    /// Called once with the transport error that ended the socket
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.error_actions.add(action(move |err: &Arc<Error>| f(err)));
    }

    /// Called for every non-fatal protocol anomaly
    ///
    /// Covers panicking handlers, replies with unknown correlation ids and
    /// undecodable frames. Disabled once the socket has closed; later
    /// anomalies are only logged.
    pub fn on_anomaly<F>(&self, f: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.anomaly_actions.add(action(move |err: &Arc<Error>| f(err)));
    }

    /// Send an event without expecting a reply
    pub fn send(&self, event: &str, data: Value) -> Result<()> {
        self.emit(&EventFrame::new(self.replies.next_id(), event, data))
    }

    /// Send an event and resolve `on_resolve` with the peer's reply
    ///
    /// Rejections are only logged.
    pub fn send_with_reply<R>(&self, event: &str, data: Value, on_resolve: R) -> Result<()>
    where
        R: FnOnce(Value) + Send + 'static,
    {
        let id = self.id.clone();
        let name = event.to_string();
        self.send_with_callbacks(event, data, on_resolve, move |err| {
            tracing::debug!(socket_id = %id, event = %name, error = %err, "Request rejected");
        })
    }

    /// Send an event expecting either a resolved or a rejected reply
    pub fn send_with_callbacks<R, J>(
        &self,
        event: &str,
        data: Value,
        on_resolve: R,
        on_reject: J,
    ) -> Result<()>
    where
        R: FnOnce(Value) + Send + 'static,
        J: FnOnce(ReplyError) + Send + 'static,
    {
        self.ensure_open()?;
        let id = self
            .replies
            .register(event, data.clone(), Box::new(on_resolve), Box::new(on_reject))?;

        if let Err(err) = self.emit(&EventFrame::request(id, event, data)) {
            // A close that raced the emit already rejected the request
            if self.replies.forget(id).is_none() {
                return Ok(());
            }
            return Err(err);
        }

        Ok(())
    }

    /// Send an event and wait for its reply
    pub async fn request(&self, event: &str, data: Value) -> std::result::Result<Value, ReplyError> {
        let (tx, rx) = oneshot::channel();
        let resolved = Arc::new(Mutex::new(Some(tx)));
        let rejected = resolved.clone();

        self.send_with_callbacks(
            event,
            data,
            move |value| {
                if let Some(tx) = resolved.lock().take() {
                    let _ = tx.send(Ok(value));
                }
            },
            move |err| {
                if let Some(tx) = rejected.lock().take() {
                    let _ = tx.send(Err(err));
                }
            },
        )?;

        rx.await.unwrap_or(Err(ReplyError::ConnectionClosed))
    }

    pub(crate) fn send_reply(&self, request_id: u64, data: Value, exception: bool) -> Result<()> {
        self.emit(&EventFrame::reply_to(
            self.replies.next_id(),
            request_id,
            data,
            exception,
        ))
    }

    /// Number of requests still awaiting a reply
    pub fn pending_replies(&self) -> usize {
        self.replies.pending()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    fn emit(&self, frame: &EventFrame) -> Result<()> {
        self.ensure_open()?;
        let text = frame.to_json()?;

        tracing::trace!(socket_id = %self.id, frame = %frame, "Sending frame");

        self.transport.send(text)
    }

    /// Handle one inbound text message: a frame or an array of frames
    pub fn receive(&self, text: &str) {
        match EventFrame::decode_batch(text) {
            Ok(frames) => {
                for frame in frames {
                    self.dispatch(frame);
                }
            }
            Err(err) => {
                tracing::debug!(socket_id = %self.id, error = %err, "Failed to parse frame");
                self.report(err.into());
            }
        }
    }

    /// Route one inbound frame to the correlator or its event handlers
    pub fn dispatch(&self, frame: EventFrame) {
        tracing::trace!(socket_id = %self.id, frame = %frame, "Received frame");

        if frame.is_reply() {
            let settled = frame
                .as_reply()
                .map_err(Error::from)
                .and_then(|reply| self.replies.settle(reply));

            if let Err(err) = settled {
                tracing::warn!(socket_id = %self.id, error = %err, "Dropped reply");
                self.report(err);
            }
            return;
        }

        let reply = match (frame.reply, frame.id) {
            (true, Some(id)) => Some(Reply::new(id, self.me.clone())),
            (true, None) => {
                self.report(Error::Codec(serde::de::Error::custom(format!(
                    "event '{}' expects a reply but carries no id",
                    frame.event
                ))));
                return;
            }
            (false, _) => None,
        };

        let dispatcher = self
            .handlers
            .get(frame.event.as_str())
            .map(|entry| Arc::clone(entry.value()));

        match dispatcher {
            Some(dispatcher) => dispatcher.fire(Incoming {
                event: frame.event,
                data: frame.data,
                reply,
            }),
            None => {
                tracing::trace!(socket_id = %self.id, event = %frame.event, "No handler for event");
            }
        }
    }

    fn report(&self, error: Error) {
        self.anomaly_actions.fire(Arc::new(error));
    }

    /// Request an orderly close; idempotent
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if *state != SocketState::Open {
                return;
            }
            *state = SocketState::Closing;
        }

        tracing::debug!(socket_id = %self.id, "Socket closing");
        self.transport.close();
    }

    /// Report a transport failure; the socket closes if it is still open
    pub fn handle_error(&self, error: Error) {
        tracing::warn!(socket_id = %self.id, error = %error, "Transport error");
        self.error_actions.fire(Arc::new(error));
        // The error dispatcher is single-fire: later errors still close.
        self.close();
    }

    /// Confirm that the transport terminated
    ///
    /// Completes the close exactly once: leaves the server, disables every
    /// event handler, rejects pending replies and fires close hooks.
    pub fn handle_closed(&self) {
        {
            let mut state = self.state.write();
            match *state {
                SocketState::Closed => return,
                SocketState::Open => *state = SocketState::Closing,
                SocketState::Closing => {}
            }
        }

        let finished = {
            let binding = self.binding.read();
            match binding.as_ref().and_then(Weak::upgrade) {
                Some(server) => {
                    drop(binding);
                    server.detach(self)
                }
                None => self.mark_closed(),
            }
        };

        if !finished {
            return;
        }

        for entry in &self.handlers {
            entry.value().disable();
        }
        for failure in self.replies.reject_all() {
            self.report(failure);
        }

        tracing::info!(socket_id = %self.id, age_ms = self.age().as_millis(), "Socket closed");
        self.close_actions.fire(());

        // Hooks may hold the socket; drop them
        self.error_actions.disable();
        self.anomaly_actions.disable();
    }

    /// `Closing → Closed`; false if another caller got there first
    pub(crate) fn mark_closed(&self) -> bool {
        let mut state = self.state.write();
        if *state == SocketState::Closed {
            false
        } else {
            *state = SocketState::Closed;
            true
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("state", &self.state())
            .field("tags", &*self.tags.read())
            .field("pending_replies", &self.replies.pending())
            .finish()
    }
}
