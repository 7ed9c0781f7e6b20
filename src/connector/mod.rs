// ABOUTME: Multiplexed RPC connector over upgraded HTTP connections
//
// Many logical request/response channels (interfaces) share a few long-lived
// duplex streams (connections) to a remote API.
//
// Key components:
// - codec: length-prefixed binary frames, -1 target for pings
// - handshake: TCP/TLS dial and the GRIDAPICONNECTOR upgrade
// - load: load classes and the decay / idle-reap rules
// - connection: one stream with its monitor and reader tasks
// - interface: request/response correlation by interface id
// - pool: load-aware selection and dialing per endpoint

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod interface;
pub mod load;
pub mod metrics;
pub mod pool;

// Re-exports for convenient access
pub use config::ConnectorConfig;
pub use connection::Connection;
pub use error::{ConnectorError, ConnectorResult};
pub use interface::Interface;
pub use load::LoadClass;
pub use metrics::{ConnectionMetrics, PoolMetrics, PoolMetricsSnapshot};
pub use pool::ConnectionPool;
