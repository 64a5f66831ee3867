//! HTTP long polling transport
//!
//! A long polling socket is driven by a sequence of exchanges distinguished
//! by the `when` parameter: `open` creates the socket, `poll` waits for
//! outbound frames, `send` delivers inbound frames and `abort` closes it.

use super::error::{BridgeError, BridgeResult};
use super::exchange::{read_body, Exchange};
use super::{check_id_free, check_transport};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use vibe_core::{Error, Handshake, LongPollPhase, Result, Server, Socket, Transport, TransportKind};

/// Outcome of starting a poll
pub(crate) enum Poll {
    /// Frames were already queued
    Ready(Vec<String>),
    /// Resolves with the next frames, or empty when superseded
    Wait(oneshot::Receiver<Vec<String>>),
    /// The transport is closed and drained
    Closed,
}

struct PollState {
    queue: Vec<String>,
    waiter: Option<oneshot::Sender<Vec<String>>>,
    closed: bool,
    last_seen: Instant,
}

/// Socket transport that hands frames to whichever poll is outstanding
pub struct LongPollTransport {
    state: Mutex<PollState>,
    closed: Notify,
}

impl LongPollTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PollState {
                queue: Vec::new(),
                waiter: None,
                closed: false,
                last_seen: Instant::now(),
            }),
            closed: Notify::new(),
        })
    }

    /// Take queued frames or park until some arrive
    ///
    /// A parked poll is superseded by the next one.
    pub(crate) fn poll(&self) -> Poll {
        let mut state = self.state.lock();
        state.last_seen = Instant::now();

        if !state.queue.is_empty() {
            return Poll::Ready(std::mem::take(&mut state.queue));
        }
        if state.closed {
            return Poll::Closed;
        }

        let (tx, rx) = oneshot::channel();
        if let Some(previous) = state.waiter.replace(tx) {
            let _ = previous.send(Vec::new());
        }
        Poll::Wait(rx)
    }

    /// Put frames back at the head of the queue after a failed response
    pub(crate) fn requeue(&self, mut frames: Vec<String>) {
        let mut state = self.state.lock();
        frames.append(&mut state.queue);
        state.queue = frames;
    }

    /// Mark the client as seen now
    pub(crate) fn touch(&self) {
        self.state.lock().last_seen = Instant::now();
    }

    /// Time since the client was last seen, `None` while a poll is parked
    pub(crate) fn idle_for(&self) -> Option<Duration> {
        let state = self.state.lock();
        match &state.waiter {
            Some(waiter) if !waiter.is_closed() => None,
            _ => Some(state.last_seen.elapsed()),
        }
    }

    /// Resolves once the transport is closed
    pub(crate) async fn closed(&self) {
        self.closed.notified().await;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of frames waiting for a poll
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Transport for LongPollTransport {
    fn send(&self, text: String) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }

        match state.waiter.take() {
            Some(waiter) => {
                // The poll may have gone away with its client
                if let Err(frames) = waiter.send(vec![text]) {
                    state.queue.extend(frames);
                }
            }
            None => state.queue.push(text),
        }

        Ok(())
    }

    fn close(&self) {
        let waiter = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.waiter.take()
        };

        if let Some(waiter) = waiter {
            let _ = waiter.send(Vec::new());
        }
        self.closed.notify_one();
    }
}

impl std::fmt::Debug for LongPollTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LongPollTransport")
            .field("queued", &state.queue.len())
            .field("parked", &state.waiter.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

#[derive(Clone)]
struct Session {
    socket: Arc<Socket>,
    transport: Arc<LongPollTransport>,
}

/// Live long polling sessions by socket id
#[derive(Clone)]
pub(crate) struct LongPollSessions {
    sessions: Arc<DashMap<String, Session>>,
    timeout: Duration,
}

impl LongPollSessions {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Serve one exchange of the long polling sequence
    pub(crate) async fn serve<X>(&self, server: &Server, exchange: &mut X) -> BridgeResult<()>
    where
        X: Exchange + ?Sized,
    {
        let handshake = Handshake::parse(exchange.uri())?;
        check_transport(&handshake, TransportKind::LongPoll)?;
        let step = handshake.when.ok_or(BridgeError::MissingStep)?;

        match (step, exchange.method()) {
            (LongPollPhase::Open | LongPollPhase::Poll, "GET")
            | (LongPollPhase::Send, "POST")
            | (LongPollPhase::Abort, "GET" | "POST") => {}
            (_, method) => return Err(BridgeError::MethodNotAllowed(method.to_string())),
        }

        match step {
            LongPollPhase::Open => self.open(server, &handshake, exchange).await,
            LongPollPhase::Poll => self.poll(&handshake, exchange).await,
            LongPollPhase::Send => {
                let session = self.session(&handshake)?;
                let body = read_body(exchange).await?;
                session.transport.touch();
                session.socket.receive(&body);
                exchange.set_status(200);
                Ok(())
            }
            LongPollPhase::Abort => {
                let session = self.session(&handshake)?;
                session.socket.close();
                exchange.set_status(200);
                Ok(())
            }
        }
    }

    async fn open<X>(&self, server: &Server, handshake: &Handshake, exchange: &mut X) -> BridgeResult<()>
    where
        X: Exchange + ?Sized,
    {
        check_id_free(server, handshake)?;
        let transport = LongPollTransport::new();
        let socket = Socket::from_handshake(handshake, exchange.uri(), transport.clone());

        // Frames sent by open hooks wait in the transport queue
        server.open(socket.clone())?;
        self.sessions.insert(
            socket.id().to_string(),
            Session {
                socket: socket.clone(),
                transport: transport.clone(),
            },
        );

        tracing::debug!(
            socket_id = %socket.id(),
            user_agent = exchange.header("user-agent").unwrap_or("-"),
            "Long polling session opened"
        );

        tokio::spawn(supervise(
            self.sessions.clone(),
            socket.clone(),
            transport,
            self.timeout,
        ));

        exchange.set_status(200);
        exchange.set_header("content-type", "application/json");
        exchange
            .write(serde_json::json!({ "id": socket.id() }).to_string())
            .await
    }

    async fn poll<X>(&self, handshake: &Handshake, exchange: &mut X) -> BridgeResult<()>
    where
        X: Exchange + ?Sized,
    {
        let session = self.session(handshake)?;

        let frames = match session.transport.poll() {
            Poll::Ready(frames) => frames,
            Poll::Wait(rx) => rx.await.unwrap_or_default(),
            Poll::Closed => Vec::new(),
        };
        session.transport.touch();

        tracing::trace!(socket_id = %session.socket.id(), frames = frames.len(), "Answering poll");

        exchange.set_status(200);
        exchange.set_header("content-type", "application/json");
        let body = format!("[{}]", frames.join(","));
        if let Err(err) = exchange.write(body).await {
            session.transport.requeue(frames);
            return Err(err);
        }
        Ok(())
    }

    fn session(&self, handshake: &Handshake) -> BridgeResult<Session> {
        if handshake.generated {
            return Err(BridgeError::UnknownSocket(String::new()));
        }

        self.sessions
            .get(&handshake.id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BridgeError::UnknownSocket(handshake.id.clone()))
    }
}

/// Close the socket when the client stops polling, and finish it once the
/// transport is closed
async fn supervise(
    sessions: Arc<DashMap<String, Session>>,
    socket: Arc<Socket>,
    transport: Arc<LongPollTransport>,
    timeout: Duration,
) {
    loop {
        let wait = transport
            .idle_for()
            .map_or(timeout, |idle| timeout.saturating_sub(idle));

        tokio::select! {
            () = transport.closed() => break,
            () = tokio::time::sleep(wait) => {
                if transport.idle_for().is_some_and(|idle| idle >= timeout) {
                    tracing::debug!(socket_id = %socket.id(), "Long polling session timed out");
                    socket.handle_error(Error::transport("long polling timed out"));
                }
            }
        }
    }

    sessions.remove_if(socket.id(), |_, session| Arc::ptr_eq(&session.socket, &socket));
    socket.handle_closed();
}
