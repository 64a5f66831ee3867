//! Batch commands over a selection of sockets

use super::registry::Server;
use crate::action::guarded;
use crate::error::Error;
use crate::socket::Socket;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Which sockets a [`Sentence`] addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    ById(String),
    /// Sockets carrying every listed tag
    ByTag(Vec<String>),
}

/// Outcome of a batch send
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Delivery {
    /// Sockets selected at send time
    pub matched: usize,
    /// Sockets whose transport accepted the frame
    pub delivered: usize,
    /// Sockets that were closing or whose transport failed
    pub failed: usize,
}

/// A selection of sockets, re-resolved on every verb
#[derive(Debug, Clone)]
pub struct Sentence {
    server: Server,
    selector: Selector,
}

impl Sentence {
    pub(crate) fn new(server: Server, selector: Selector) -> Self {
        Self { server, selector }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Sockets currently matching the selector
    pub fn sockets(&self) -> Vec<Arc<Socket>> {
        self.server.resolve(&self.selector)
    }

    /// Run `f` for every matching socket
    pub fn for_each<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&Arc<Socket>),
    {
        let sockets = self.sockets();
        for socket in &sockets {
            f(socket);
        }
        sockets.len()
    }

    /// Send an event to every matching socket
    ///
    /// A socket that fails, or whose transport panics, is counted and logged
    /// without affecting the others.
    pub fn send(&self, event: &str, data: Value) -> Delivery {
        let sockets = self.sockets();
        let mut delivery = Delivery {
            matched: sockets.len(),
            ..Delivery::default()
        };

        for socket in &sockets {
            let outcome =
                guarded(socket.id(), || socket.send(event, data.clone())).and_then(|sent| sent);

            match outcome {
                Ok(()) => delivery.delivered += 1,
                Err(Error::ConnectionClosed) => {
                    tracing::debug!(socket_id = %socket.id(), event = %event, "Skipped closing socket");
                    delivery.failed += 1;
                }
                Err(err) => {
                    tracing::warn!(socket_id = %socket.id(), event = %event, error = %err, "Failed to send to socket");
                    delivery.failed += 1;
                }
            }
        }

        tracing::debug!(
            selector = ?self.selector,
            event = %event,
            matched = delivery.matched,
            delivered = delivery.delivered,
            "Batch send complete"
        );

        delivery
    }

    /// Close every matching socket
    pub fn close(&self) -> usize {
        self.for_each(|socket| socket.close())
    }

    /// Add tags to every matching socket
    pub fn tag<S: AsRef<str>>(&self, names: &[S]) -> usize {
        self.for_each(|socket| socket.tag(names.iter().map(|name| name.as_ref().to_string())))
    }

    /// Remove tags from every matching socket
    pub fn untag<S: AsRef<str>>(&self, names: &[S]) -> usize {
        self.for_each(|socket| socket.untag(names))
    }
}
