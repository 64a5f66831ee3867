//! Test helpers for integration tests
//!
//! Provides utilities for spawning test servers, connecting WebSocket
//! clients and driving long polling over HTTP.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, Response};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use vibe_common::GatewayConfig;
use vibe_core::Server;
use vibe_gateway::server::{create_app, create_gateway_state, run_server};

/// How long helpers wait for an expected event
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test server instance that manages lifecycle
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub server: Server,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server
    pub async fn start() -> Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start a test server, letting `setup` install socket hooks first
    pub async fn start_with<F>(setup: F) -> Result<Self>
    where
        F: FnOnce(&Server),
    {
        Self::start_with_config(test_config(&[])?, setup).await
    }

    /// Start a test server with custom config
    pub async fn start_with_config<F>(config: GatewayConfig, setup: F) -> Result<Self>
    where
        F: FnOnce(&Server),
    {
        let server = Server::new();
        setup(&server);

        let app = create_app(create_gateway_state(server.clone(), config));

        // Bind to an ephemeral port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown, signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            run_server(app, listener, async {
                let _ = signal.await;
            })
            .await
            .ok();
        });

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            addr,
            client,
            server,
            shutdown: Some(shutdown),
            handle,
        })
    }

    /// Get base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Socket endpoint URL with `query`
    pub fn socket_url(&self, scheme: &str, query: &str) -> String {
        format!("{scheme}://{}/vibe?{query}", self.addr)
    }

    /// Open a WebSocket with the handshake in `query`
    pub async fn connect(&self, query: &str) -> Result<WsClient> {
        let (stream, _) = connect_async(self.socket_url("ws", query)).await?;
        Ok(WsClient { stream })
    }

    /// Open a WebSocket and wait until the server has registered it
    pub async fn connect_as(&self, id: &str, tags: &[&str]) -> Result<WsClient> {
        let client = self
            .connect(&format!("id={id}&tags={}", tags.join(",")))
            .await?;
        eventually(|| self.server.get(id).is_some()).await?;
        Ok(client)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.get(&url).send().await?)
    }

    /// Make a POST request with a raw body
    pub async fn post(&self, path: &str, body: String) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.post(&url).body(body).send().await?)
    }

    /// Close every socket, then stop the HTTP server
    pub async fn stop(mut self) -> Result<()> {
        self.server.shutdown();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        tokio::time::timeout(WAIT_TIMEOUT, &mut self.handle)
            .await
            .context("server did not stop")??;
        Ok(())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Create a test configuration
pub fn test_config(overrides: &[(&str, &str)]) -> Result<GatewayConfig> {
    let config = GatewayConfig::from_lookup(|key| {
        overrides
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| (*value).to_string())
            .or_else(|| (key == "GATEWAY_PORT").then(|| "0".to_string()))
    })
    .map_err(|e| anyhow::anyhow!("Config error: {e}"))?;

    Ok(config)
}

/// WebSocket client speaking JSON event frames
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Send one frame
    pub async fn send(&mut self, frame: Value) -> Result<()> {
        self.stream.send(Message::text(frame.to_string())).await?;
        Ok(())
    }

    /// Next frame sent by the server
    pub async fn next_frame(&mut self) -> Result<Value> {
        loop {
            match self.next_message().await? {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => bail!("connection closed: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Wait for the server's close and return its close code
    pub async fn next_close(&mut self) -> Result<Option<u16>> {
        loop {
            if let Message::Close(frame) = self.next_message().await? {
                return Ok(frame.map(|frame| u16::from(frame.code)));
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Message> {
        tokio::time::timeout(WAIT_TIMEOUT, self.stream.next())
            .await
            .context("timed out waiting for message")?
            .context("connection ended")?
            .map_err(Into::into)
    }
}

/// Wait until `condition` holds
pub async fn eventually<F: Fn() -> bool>(condition: F) -> Result<()> {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("condition not reached")
}
