//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via ANISYNC_CONFIG)
//! 3. Environment variables

use crate::connection::ConnectionConfig;
use anisync_core::{Credentials, EngineConfig};
use anisync_protocol::{DEFAULT_PORT, DEFAULT_SERVER};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server address.
    pub server: ServerConfig,
    /// Account and client registration.
    pub auth: AuthConfig,
    /// Journal and catalog locations.
    pub storage: StorageConfig,
    /// Engine tuning.
    pub engine: EngineSettings,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ANISYNC_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.server.apply_env_overrides();
        self.auth.apply_env_overrides();
        self.storage.apply_env_overrides();
        self.engine.apply_env_overrides();
    }

    /// Reads the password from the secrets file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        self.auth.load_secrets()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.host must not be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must not be 0".to_string(),
            ));
        }
        if self.engine.guard_expiry_secs <= 0 {
            return Err(ConfigError::ValidationError(
                "engine.guard_expiry_secs must be positive".to_string(),
            ));
        }
        if self.auth.user.is_some() != self.auth.password.is_some() {
            return Err(ConfigError::ValidationError(
                "auth.user and a password must be set together".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file. The password is never written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            client_name: self.auth.client_name.clone(),
            client_version: self.auth.client_version,
            guard_expiry_secs: self.engine.guard_expiry_secs,
        }
    }

    /// Connection settings for `SyncClient::connect`.
    pub fn connection(&self) -> ConnectionConfig {
        let mut conn = ConnectionConfig::new(self.server.addr())
            .with_local_port(self.server.local_port)
            .with_engine(self.engine_config());
        if let Some(credentials) = self.auth.credentials() {
            conn = conn.with_credentials(credentials);
        }
        conn
    }
}

/// Server address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Local UDP port (0 = any).
    pub local_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT,
            local_port: 0,
        }
    }
}

impl ServerConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("ANISYNC_SERVER") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port) = std::env::var("ANISYNC_PORT") {
            if let Ok(p) = port.parse() {
                self.port = p;
            }
        }

        if let Ok(port) = std::env::var("ANISYNC_LOCAL_PORT") {
            if let Ok(p) = port.parse() {
                self.local_port = p;
            }
        }
    }

    /// `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Account and client registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub user: Option<String>,
    /// Accepted from the file for convenience; prefer `secrets_file`.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// File whose first non-comment line is the password.
    pub secrets_file: Option<PathBuf>,
    /// Client name registered with the server.
    pub client_name: String,
    pub client_version: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            user: None,
            password: None,
            secrets_file: None,
            client_name: engine.client_name,
            client_version: engine.client_version,
        }
    }
}

impl AuthConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(user) = std::env::var("ANISYNC_USER") {
            if !user.is_empty() {
                self.user = Some(user);
            }
        }

        if let Ok(password) = std::env::var("ANISYNC_PASSWORD") {
            if !password.is_empty() {
                self.password = Some(password);
            }
        }

        if let Ok(path) = std::env::var("ANISYNC_SECRETS_FILE") {
            self.secrets_file = Some(PathBuf::from(path));
        }

        if let Ok(name) = std::env::var("ANISYNC_CLIENT") {
            if !name.is_empty() {
                self.client_name = name;
            }
        }

        if let Ok(version) = std::env::var("ANISYNC_CLIENT_VERSION") {
            if let Ok(v) = version.parse() {
                self.client_version = v;
            }
        }
    }

    /// Loads the password from the secrets file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        if let Some(ref path) = self.secrets_file {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.clone(), e))?;
            let password = content
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty() && !l.starts_with('#'))
                .ok_or_else(|| {
                    ConfigError::ValidationError(format!(
                        "secrets file '{}' holds no password",
                        path.display()
                    ))
                })?;
            self.password = Some(password.to_string());
        }
        Ok(())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some(Credentials::new(user, password)),
            _ => None,
        }
    }
}

/// Journal and catalog locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Sync the packet journal after every write.
    pub sync_on_write: bool,
    /// Compact the packet journal when the daemon starts.
    pub compact_on_start: bool,
    /// How often the catalog is written to disk, in seconds.
    pub flush_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sync_on_write: true,
            compact_on_start: true,
            flush_interval_secs: 30,
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("ANISYNC_DATA") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(sync) = std::env::var("ANISYNC_SYNC_ON_WRITE") {
            self.sync_on_write = sync == "1" || sync.to_lowercase() == "true";
        }

        if let Ok(interval) = std::env::var("ANISYNC_FLUSH_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.flush_interval_secs = secs;
            }
        }
    }

    /// Returns the packet journal path.
    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("packets.journal")
    }

    /// Returns the catalog directory path.
    pub fn catalog_dir(&self) -> PathBuf {
        self.data_dir.join("catalog")
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

/// Engine tuning.
///
/// The send cadence is not here: the server requires a fixed gap between
/// packets, see [`anisync_protocol::SEND_INTERVAL`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How long a duplicate request stays blocked, in seconds.
    pub guard_expiry_secs: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            guard_expiry_secs: engine.guard_expiry_secs,
        }
    }
}

impl EngineSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(secs) = std::env::var("ANISYNC_GUARD_EXPIRY") {
            if let Ok(n) = secs.parse() {
                self.guard_expiry_secs = n;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
