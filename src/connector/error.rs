// ABOUTME: Error type shared by the handshake, connection, interface and pool layers

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while dialing or using a connector session
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Endpoint could not be parsed as a URL
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Endpoint scheme is neither http nor https
    #[error("Unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// TCP connect did not complete in time
    #[error("Timed out connecting to {host}:{port} after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    /// TLS setup or handshake failed
    #[error("TLS error: {0}")]
    Tls(String),

    /// Upgrade response did not start with an HTTP/1.1 status line
    #[error("Server returned invalid protocol")]
    InvalidProtocol,

    /// Upgrade response contained a line we could not parse
    #[error("Malformed upgrade response: {0}")]
    MalformedHeader(String),

    /// Server answered the upgrade with something other than 101
    #[error("Received HTTP {0}")]
    Status(String),

    /// Connection was closed before or during the operation
    #[error("Connection is not connected")]
    Disconnected,

    /// Interface has been closed
    #[error("Interface {0} is closed")]
    InterfaceClosed(i32),

    /// Connection has handed out every interface id it can address
    #[error("Interface id space exhausted on this connection")]
    InterfaceIdsExhausted,

    /// Request payload could not be encoded as JSON
    #[error("Failed to serialize request payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Pool has been shut down
    #[error("Connection pool is shut down")]
    PoolShutDown,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectorError {
    /// Check if this error means the underlying stream is gone
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;
