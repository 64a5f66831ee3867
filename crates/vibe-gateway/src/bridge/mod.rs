//! Transport bridge
//!
//! Turns raw connections into registered sockets: full-duplex channels
//! (WebSocket) and HTTP long polling exchanges.

mod channel;
mod error;
mod exchange;
mod longpoll;

pub use channel::{ChannelMessage, ChannelTransport};
pub use error::{BridgeError, BridgeResult};
pub use exchange::Exchange;
pub use longpoll::LongPollTransport;

use futures::{Sink, Stream};
use longpoll::LongPollSessions;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use vibe_core::{Error, Handshake, Server, Socket, TransportKind};

/// Outbound frames a channel may queue before its peer counts as stalled
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Bridge settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Close a long polling socket after this long without a poll
    pub longpoll_timeout: Duration,
    /// Outbound queue length per channel
    pub channel_buffer: usize,
    /// How long a closing channel may keep flushing queued frames
    pub drain_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            longpoll_timeout: Duration::from_secs(30),
            channel_buffer: CHANNEL_BUFFER_SIZE,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&vibe_common::GatewayConfig> for BridgeConfig {
    fn from(config: &vibe_common::GatewayConfig) -> Self {
        Self {
            longpoll_timeout: config.longpoll_timeout(),
            ..Self::default()
        }
    }
}

/// Refuse a handshake naming another transport than the one serving it
pub(crate) fn check_transport(handshake: &Handshake, served: TransportKind) -> vibe_core::Result<()> {
    match handshake.transport {
        Some(requested) if requested != served => Err(Error::handshake(format!(
            "transport '{}' requested on a '{}' endpoint",
            requested.as_str(),
            served.as_str()
        ))),
        _ => Ok(()),
    }
}

/// Refuse a live id before a socket is built for it
///
/// `Server::open` repeats the check under its index lock.
pub(crate) fn check_id_free(server: &Server, handshake: &Handshake) -> vibe_core::Result<()> {
    if server.get(&handshake.id).is_some() {
        return Err(Error::handshake(format!(
            "socket id '{}' is already in use",
            handshake.id
        )));
    }
    Ok(())
}

/// Attaches transports to a server
#[derive(Clone)]
pub struct TransportBridge {
    server: Server,
    config: BridgeConfig,
    longpolls: LongPollSessions,
}

impl TransportBridge {
    pub fn new(server: Server, config: BridgeConfig) -> Self {
        let longpolls = LongPollSessions::new(config.longpoll_timeout);
        Self {
            server,
            config,
            longpolls,
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Number of open long polling sessions
    pub fn longpoll_sessions(&self) -> usize {
        self.longpolls.len()
    }

    /// Register a socket on a full-duplex channel
    ///
    /// `uri` carries the handshake. On rejection the channel receives a close
    /// message with the matching close code.
    pub async fn accept_channel<Si, St, E>(
        &self,
        uri: &str,
        sink: Si,
        stream: St,
    ) -> BridgeResult<Arc<Socket>>
    where
        Si: Sink<ChannelMessage> + Send + Unpin + 'static,
        Si::Error: Display,
        St: Stream<Item = Result<ChannelMessage, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        channel::accept(&self.server, &self.config, uri, sink, stream).await
    }

    /// Serve one long polling exchange and finish its response
    ///
    /// Failures are answered with an HTTP status and returned for logging.
    pub async fn accept_exchange<X>(&self, exchange: &mut X) -> BridgeResult<()>
    where
        X: Exchange + ?Sized,
    {
        let result = self.longpolls.serve(&self.server, exchange).await;

        if let Err(err) = &result {
            tracing::debug!(uri = %exchange.uri(), error = %err, "Long polling request failed");
            exchange.set_status(err.status());
            let _ = exchange.write(err.to_string()).await;
        }
        let _ = exchange.close().await;

        result
    }
}

impl std::fmt::Debug for TransportBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportBridge")
            .field("server", &self.server)
            .field("config", &self.config)
            .field("longpoll_sessions", &self.longpolls.len())
            .finish()
    }
}
