//! Gateway state
//!
//! Application state for the gateway server.

use crate::bridge::TransportBridge;
use std::sync::Arc;
use vibe_common::GatewayConfig;
use vibe_core::Server;

/// Gateway application state
#[derive(Clone)]
pub struct GatewayState {
    /// Bridge attaching incoming connections to the socket server
    bridge: TransportBridge,
    /// Gateway configuration
    config: Arc<GatewayConfig>,
}

impl GatewayState {
    /// Create a new gateway state
    pub fn new(bridge: TransportBridge, config: GatewayConfig) -> Self {
        Self {
            bridge,
            config: Arc::new(config),
        }
    }

    pub fn bridge(&self) -> &TransportBridge {
        &self.bridge
    }

    /// Get the socket server
    pub fn server(&self) -> &Server {
        self.bridge.server()
    }

    /// Get the gateway configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("bridge", &self.bridge)
            .field("config", &"GatewayConfig")
            .finish()
    }
}
