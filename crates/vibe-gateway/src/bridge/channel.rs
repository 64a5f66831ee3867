//! Full-duplex channel transport
//!
//! Adapts any message sink/stream pair (an upgraded WebSocket in the host)
//! to a socket. Outbound frames go through a bounded queue drained by a
//! writer task, so senders never wait on network I/O. A peer that stops
//! reading fills the queue and the socket is closed with a transport error.

use super::error::BridgeResult;
use super::{check_id_free, check_transport, BridgeConfig};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use vibe_core::{CloseCode, Error, Handshake, Result, Server, Socket, Transport, TransportKind};

const QUEUE_FULL: &str = "outbound queue full";

/// A message on a full-duplex channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    /// Decoded as UTF-8 text
    Binary(Vec<u8>),
    /// Close, with the peer's or our close code
    Close(Option<u16>),
}

/// Socket transport backed by a channel writer task
pub struct ChannelTransport {
    tx: mpsc::Sender<String>,
    close_code: Mutex<CloseCode>,
    /// Tells the writer to flush and send the close message
    closing: Notify,
    /// Tells the supervisor the peer stopped keeping up
    overflowed: Notify,
}

impl ChannelTransport {
    fn new(buffer: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let transport = Arc::new(Self {
            tx,
            close_code: Mutex::new(CloseCode::Normal),
            closing: Notify::new(),
            overflowed: Notify::new(),
        });
        (transport, rx)
    }

    /// Close code sent when the socket closes this channel
    pub fn set_close_code(&self, code: CloseCode) {
        *self.close_code.lock() = code;
    }
}

impl Transport for ChannelTransport {
    fn send(&self, text: String) -> Result<()> {
        match self.tx.try_send(text) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.set_close_code(CloseCode::UnknownError);
                self.overflowed.notify_one();
                Err(Error::transport(QUEUE_FULL))
            }
            Err(TrySendError::Closed(_)) => Err(Error::transport("channel writer stopped")),
        }
    }

    fn close(&self) {
        self.closing.notify_one();
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("close_code", &*self.close_code.lock())
            .field("capacity", &self.tx.capacity())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Attach a channel to `server` under the handshake carried by `uri`
pub(crate) async fn accept<Si, St, E>(
    server: &Server,
    config: &BridgeConfig,
    uri: &str,
    mut sink: Si,
    stream: St,
) -> BridgeResult<Arc<Socket>>
where
    Si: Sink<ChannelMessage> + Send + Unpin + 'static,
    Si::Error: Display,
    St: Stream<Item = std::result::Result<ChannelMessage, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let opened = Handshake::parse(uri).and_then(|handshake| {
        check_transport(&handshake, TransportKind::WebSocket)?;
        check_id_free(server, &handshake)?;

        let (transport, rx) = ChannelTransport::new(config.channel_buffer);
        let socket = Socket::from_handshake(&handshake, uri, transport.clone());
        server.open(socket.clone())?;
        Ok((socket, transport, rx))
    });

    let (socket, transport, rx) = match opened {
        Ok(opened) => opened,
        Err(err) => {
            tracing::debug!(uri = %uri, error = %err, "Rejected channel");
            let _ = sink
                .send(ChannelMessage::Close(Some(err.close_code().as_u16())))
                .await;
            let _ = sink.close().await;
            return Err(err.into());
        }
    };

    let mut reader = tokio::spawn(read_loop(stream, socket.clone(), transport.clone()));
    let mut writer = tokio::spawn(write_loop(
        rx,
        sink,
        transport.clone(),
        socket.id().to_string(),
    ));

    let supervised = socket.clone();
    let drain_timeout = config.drain_timeout;
    tokio::spawn(async move {
        tokio::select! {
            _ = &mut reader => {
                // Echo the close and let the writer drain
                supervised.close();
                drain(&mut writer, drain_timeout).await;
            }
            result = &mut writer => {
                if let Ok(Err(err)) = result {
                    supervised.handle_error(err);
                }
            }
            () = transport.overflowed.notified() => {
                tracing::warn!(socket_id = %supervised.id(), "Peer is not reading, closing channel");
                supervised.handle_error(Error::transport(QUEUE_FULL));
                drain(&mut writer, drain_timeout).await;
            }
        }

        reader.abort();
        supervised.handle_closed();
    });

    Ok(socket)
}

/// Give the writer `timeout` to flush, then stop it
async fn drain(writer: &mut JoinHandle<Result<()>>, timeout: Duration) {
    if tokio::time::timeout(timeout, &mut *writer).await.is_err() {
        writer.abort();
    }
}

/// Feed inbound messages to the socket until the peer closes or fails
async fn read_loop<St, E>(mut stream: St, socket: Arc<Socket>, transport: Arc<ChannelTransport>)
where
    St: Stream<Item = std::result::Result<ChannelMessage, E>> + Unpin,
    E: Display,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(ChannelMessage::Text(text)) => socket.receive(&text),
            Ok(ChannelMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => socket.receive(&text),
                Err(_) => {
                    tracing::debug!(socket_id = %socket.id(), "Dropped non UTF-8 binary message");
                }
            },
            Ok(ChannelMessage::Close(code)) => {
                let reason = code
                    .and_then(CloseCode::from_u16)
                    .map_or("unrecognized", CloseCode::description);
                tracing::debug!(socket_id = %socket.id(), close_code = ?code, reason, "Peer closed channel");
                return;
            }
            Err(err) => {
                transport.set_close_code(CloseCode::UnknownError);
                socket.handle_error(Error::transport(err));
                return;
            }
        }
    }
}

/// Drain the outbound queue into the sink until the socket closes it
async fn write_loop<Si>(
    mut rx: mpsc::Receiver<String>,
    mut sink: Si,
    transport: Arc<ChannelTransport>,
    socket_id: String,
) -> Result<()>
where
    Si: Sink<ChannelMessage> + Unpin,
    Si::Error: Display,
{
    loop {
        tokio::select! {
            biased;
            () = transport.closing.notified() => break,
            text = rx.recv() => match text {
                Some(text) => write_text(&mut sink, text, &socket_id).await?,
                None => {
                    let _ = sink.close().await;
                    return Ok(());
                }
            },
        }
    }

    // Frames queued before the close still go out
    rx.close();
    while let Some(text) = rx.recv().await {
        write_text(&mut sink, text, &socket_id).await?;
    }

    let code = *transport.close_code.lock();
    tracing::debug!(socket_id = %socket_id, close_code = %code, "Closing channel");
    let _ = sink.send(ChannelMessage::Close(Some(code.as_u16()))).await;
    let _ = sink.close().await;
    Ok(())
}

async fn write_text<Si>(sink: &mut Si, text: String, socket_id: &str) -> Result<()>
where
    Si: Sink<ChannelMessage> + Unpin,
    Si::Error: Display,
{
    sink.send(ChannelMessage::Text(text)).await.map_err(|err| {
        tracing::warn!(socket_id = %socket_id, error = %err, "Failed to write to channel");
        Error::transport(err)
    })
}
