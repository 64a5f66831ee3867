//! Test doubles shared by the unit tests

use crate::error::{Error, Result};
use crate::protocol::EventFrame;
use crate::socket::{Socket, Transport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Transport that records everything written to it
#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    closes: AtomicUsize,
    failing: AtomicBool,
    panicking: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following `send` fail
    pub(crate) fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Record every following frame, then panic
    pub(crate) fn panic_on_send(&self) {
        self.panicking.store(true, Ordering::SeqCst);
    }

    pub(crate) fn frames(&self) -> Vec<EventFrame> {
        self.sent
            .lock()
            .iter()
            .map(|text| EventFrame::from_json(text).unwrap())
            .collect()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn send(&self, text: String) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::transport("send queue gone"));
        }
        self.sent.lock().push(text);
        assert!(
            !self.panicking.load(Ordering::SeqCst),
            "transport failed after write"
        );
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Open an unregistered socket on a fresh recording transport
pub(crate) fn socket_with<I, S>(id: &str, tags: I) -> (Arc<Socket>, Arc<RecordingTransport>)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let transport = RecordingTransport::new();
    let socket = Socket::new(id, format!("/vibe?id={id}"), tags, transport.clone());
    (socket, transport)
}
