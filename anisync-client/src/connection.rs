//! Connection settings.

use anisync_core::{Credentials, EngineConfig};
use anisync_protocol::SEND_INTERVAL;
use std::time::Duration;

/// How `SyncClient` reaches the server and drives the engine.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address as `host:port`; resolved on connect.
    pub server: String,
    /// Local UDP port (0 = any).
    pub local_port: u16,
    /// Period of the engine tick. Sends are still spaced by the engine.
    pub tick_interval: Duration,
    pub engine: EngineConfig,
    pub credentials: Option<Credentials>,
}

impl ConnectionConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            local_port: 0,
            tick_interval: SEND_INTERVAL,
            engine: EngineConfig::default(),
            credentials: None,
        }
    }

    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_client(mut self, name: impl Into<String>, version: u32) -> Self {
        self.engine.client_name = name.into();
        self.engine.client_version = version;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}
