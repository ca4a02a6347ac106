//! # anisync-client
//!
//! Client library for anisync.
//!
//! This crate provides:
//! - A tokio UDP socket adapter for the protocol engine
//! - YAML + environment configuration
//! - `SyncClient`, which drives the engine on the send cadence until shut down

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod socket;

pub use client::{ShutdownHandle, SyncClient};
pub use config::{Config, ConfigError};
pub use connection::ConnectionConfig;
pub use error::ClientError;
pub use socket::UdpSocketAdapter;
