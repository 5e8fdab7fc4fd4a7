//! Configuration types for the RPC client and server.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A parsed `tcp://host:port` connection string.
///
/// The server binds this address; clients dial it outbound. Port 0 asks
/// the OS for an ephemeral port on the server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Failure parsing a connection string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointParseError {
    #[error("missing scheme separator in {0:?}")]
    MissingScheme(String),
    #[error("unsupported scheme {0:?}, only tcp is available")]
    UnsupportedScheme(String),
    #[error("missing host in {0:?}")]
    MissingHost(String),
    #[error("missing or invalid port in {0:?}")]
    InvalidPort(String),
}

impl Endpoint {
    /// Parses a `tcp://host:port` connection string.
    ///
    /// # Errors
    ///
    /// Returns an [`EndpointParseError`] describing the malformed part.
    pub fn parse(input: &str) -> Result<Self, EndpointParseError> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| EndpointParseError::MissingScheme(input.to_string()))?;
        if scheme != "tcp" {
            return Err(EndpointParseError::UnsupportedScheme(scheme.to_string()));
        }
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::InvalidPort(input.to_string()))?;
        if host.is_empty() {
            return Err(EndpointParseError::MissingHost(input.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| EndpointParseError::InvalidPort(input.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// The `host:port` form used for binding and dialing.
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

/// Server-side tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bounded wait for one inbound frame before the run loop re-checks
    /// for shutdown.
    pub receive_tick: Duration,
    /// Capacity of the outbound reply channel drained by the socket owner.
    pub outbound_capacity: usize,
    /// Per-peer write channel capacity inside the router socket.
    pub peer_channel_capacity: usize,
    /// Maximum encoded frame size accepted from the wire.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            receive_tick: Duration::from_secs(1),
            outbound_capacity: 256,
            peer_channel_capacity: 64,
            max_frame_bytes: 16 * 1024 * 1024, // 16 MB
        }
    }
}

/// Client-side tunables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum encoded frame size accepted from the wire.
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 16 * 1024 * 1024, // 16 MB
        }
    }
}
