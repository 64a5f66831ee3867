//! Gateway server setup
//!
//! Provides the HTTP server configuration and routes.

mod handler;
mod state;

pub use handler::{socket_get_handler, socket_post_handler, AxumExchange};
pub use state::GatewayState;

use crate::bridge::{BridgeConfig, TransportBridge};
use axum::{routing::get, Router};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use vibe_common::{AppError, AppResult, GatewayConfig};
use vibe_core::Server;

/// Create the gateway router serving sockets on `path`
pub fn create_router(path: &str) -> Router<GatewayState> {
    Router::new()
        .route(path, get(socket_get_handler).post(socket_post_handler))
        .route("/health", get(health_check))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    create_router(&state.config().path)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create `GatewayState` around `server`
pub fn create_gateway_state(server: Server, config: GatewayConfig) -> GatewayState {
    let bridge = TransportBridge::new(server, BridgeConfig::from(&config));
    GatewayState::new(bridge, config)
}

/// Serve `app` until `shutdown` resolves
pub async fn run_server<F>(app: Router, listener: TcpListener, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("Gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::server(format!("Server error: {e}")))
}

/// Run the gateway for `server` until Ctrl+C
///
/// Every socket is closed before the HTTP server stops.
pub async fn run(server: Server, config: GatewayConfig) -> AppResult<()> {
    let address = config.address();
    let path = config.path.clone();

    let state = create_gateway_state(server.clone(), config);
    let app = create_app(state);

    let listener = TcpListener::bind(&address).await?;
    tracing::info!(path = %path, "Sockets served on ws://{}{}", address, path);

    run_server(app, listener, async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        server.shutdown();
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_app() -> (Router, Server) {
        let config = GatewayConfig::from_lookup(|key| match key {
            "GATEWAY_PORT" => Some("0".to_string()),
            _ => None,
        })
        .unwrap();
        let server = Server::new();
        (create_app(create_gateway_state(server.clone(), config)), server)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response: Response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _server) = test_app();
        let (status, body) = call(&app, "GET", "/health", "").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_longpoll_over_http() {
        let (app, server) = test_app();

        let (status, body) = call(&app, "GET", "/vibe?transport=longpoll&when=open", "").await;
        assert_eq!(status, StatusCode::OK);
        let opened: Value = serde_json::from_str(&body).unwrap();
        let id = opened["id"].as_str().unwrap().to_string();
        let socket = server.get(&id).unwrap();

        let echo = socket.clone();
        socket.on("echo", move |incoming| {
            echo.send("echo", incoming.data().clone()).unwrap();
        });

        let (status, _) = call(
            &app,
            "POST",
            &format!("/vibe?id={id}&when=send"),
            r#"{"type":"echo","data":"hello"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, "GET", &format!("/vibe?id={id}&when=poll"), "").await;
        assert_eq!(status, StatusCode::OK);
        let frames: Vec<Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "echo");
        assert_eq!(frames[0]["data"], "hello");
    }

    #[tokio::test]
    async fn test_longpoll_errors() {
        let (app, _server) = test_app();

        let (status, _) = call(&app, "GET", "/vibe?id=ghost&when=poll", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "GET", "/vibe?id=ghost&when=send", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, body) = call(&app, "GET", "/vibe?when=open&transport=carrier-pigeon", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("Invalid handshake"));
    }
}
