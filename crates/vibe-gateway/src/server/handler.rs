//! HTTP and WebSocket handlers
//!
//! Adapts axum's WebSocket to a bridge channel and axum requests to bridge
//! exchanges.

use crate::bridge::{BridgeError, BridgeResult, ChannelMessage, Exchange};
use crate::server::GatewayState;
use async_trait::async_trait;
use axum::{
    body::BodyDataStream,
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Request, State, WebSocketUpgrade,
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;

/// `GET` on the socket path: WebSocket upgrade or long polling
pub async fn socket_get_handler(
    State(state): State<GatewayState>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    match ws {
        Some(ws) => {
            let uri = request.uri().to_string();
            ws.on_upgrade(move |socket| handle_socket(state, socket, uri))
        }
        None => serve_exchange(state, request).await,
    }
}

/// `POST` on the socket path: long polling send
pub async fn socket_post_handler(State(state): State<GatewayState>, request: Request) -> Response {
    serve_exchange(state, request).await
}

/// Handle an upgraded WebSocket connection
async fn handle_socket(state: GatewayState, socket: WebSocket, uri: String) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|message: ChannelMessage| {
        future::ready(Ok::<Message, axum::Error>(into_ws_message(message)))
    });
    let stream = stream.filter_map(|message| future::ready(from_ws_message(message)));

    match state.bridge().accept_channel(&uri, sink, stream).await {
        Ok(socket) => {
            tracing::info!(socket_id = %socket.id(), "WebSocket connection established");
        }
        Err(e) => {
            tracing::warn!(uri = %uri, error = %e, "WebSocket connection rejected");
        }
    }
}

fn into_ws_message(message: ChannelMessage) -> Message {
    match message {
        ChannelMessage::Text(text) => Message::Text(text),
        ChannelMessage::Binary(bytes) => Message::Binary(bytes),
        ChannelMessage::Close(code) => Message::Close(code.map(|code| CloseFrame {
            code,
            reason: Cow::Borrowed(""),
        })),
    }
}

fn from_ws_message(
    message: Result<Message, axum::Error>,
) -> Option<Result<ChannelMessage, axum::Error>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(ChannelMessage::Text(text))),
        Ok(Message::Binary(bytes)) => Some(Ok(ChannelMessage::Binary(bytes))),
        Ok(Message::Close(frame)) => Some(Ok(ChannelMessage::Close(frame.map(|f| f.code)))),
        // Pong is handled automatically by axum
        Ok(Message::Ping(_) | Message::Pong(_)) => None,
        Err(e) => Some(Err(e)),
    }
}

async fn serve_exchange(state: GatewayState, request: Request) -> Response {
    let mut exchange = AxumExchange::new(request);

    if let Err(e) = state.bridge().accept_exchange(&mut exchange).await {
        tracing::debug!(error = %e, "Long polling exchange failed");
    }

    exchange.into_response()
}

/// An axum request with a buffered response
pub struct AxumExchange {
    method: String,
    uri: String,
    headers: HeaderMap,
    body: BodyDataStream,
    status: StatusCode,
    response_headers: HeaderMap,
    response: String,
}

impl AxumExchange {
    pub fn new(request: Request) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            method: parts.method.as_str().to_string(),
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body: body.into_data_stream(),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            response: String::new(),
        }
    }
}

impl IntoResponse for AxumExchange {
    fn into_response(self) -> Response {
        (self.status, self.response_headers, self.response).into_response()
    }
}

#[async_trait]
impl Exchange for AxumExchange {
    fn method(&self) -> &str {
        &self.method
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    async fn next_chunk(&mut self) -> Option<BridgeResult<Vec<u8>>> {
        self.body.next().await.map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| BridgeError::InvalidBody(e.to_string()))
        })
    }

    fn set_status(&mut self, status: u16) {
        self.status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.response_headers.insert(name, value);
        }
    }

    async fn write(&mut self, data: String) -> BridgeResult<()> {
        self.response.push_str(&data);
        Ok(())
    }

    async fn close(&mut self) -> BridgeResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for AxumExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxumExchange")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("status", &self.status)
            .finish()
    }
}
