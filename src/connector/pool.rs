// ABOUTME: Connection pool selecting or dialing connections per endpoint
// ABOUTME: Prefers the least loaded live connection and drops connections once they disconnect

//! Connection pool
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ConnectionPool                       │
//! │  connections: HashMap<endpoint, Vec<Arc<Connection>>>    │
//! │     - https://api.example/ -> [idle, busy, overloaded]   │
//! │                                                          │
//! │  connect(): Idle -> Normal -> Busy -> dial a new one     │
//! │  watcher task per connection removes it on disconnect    │
//! └──────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex as AsyncMutex;
use tokio_rustls::rustls::ClientConfig;
use tracing::{debug, info, warn};
use url::Url;

use super::config::ConnectorConfig;
use super::connection::Connection;
use super::error::{ConnectorError, ConnectorResult};
use super::load::LoadClass;
use super::metrics::PoolMetrics;

struct PoolInner {
    config: Arc<ConnectorConfig>,

    /// Custom TLS client config; webpki roots when absent
    tls: Option<Arc<ClientConfig>>,

    /// Pooled connections by endpoint key
    connections: AsyncMutex<HashMap<String, Vec<Arc<Connection>>>>,

    metrics: PoolMetrics,

    shutdown: AtomicBool,
}

/// Registry of live connections, shared by cloning
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("custom_tls", &self.inner.tls.is_some())
            .field("shutdown", &self.is_shut_down())
            .finish()
    }
}

impl ConnectionPool {
    /// Create an empty pool
    pub fn new(config: ConnectorConfig) -> Self {
        Self::build(config, None)
    }

    /// Create an empty pool that dials https endpoints with `tls`
    pub fn with_tls_config(config: ConnectorConfig, tls: Arc<ClientConfig>) -> Self {
        Self::build(config, Some(tls))
    }

    fn build(config: ConnectorConfig, tls: Option<Arc<ClientConfig>>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config: Arc::new(config),
                tls,
                connections: AsyncMutex::new(HashMap::new()),
                metrics: PoolMetrics::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Configuration handed to every dialed connection
    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Pool metrics
    pub fn metrics(&self) -> &PoolMetrics {
        &self.inner.metrics
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Get a connection for `endpoint`, reusing a pooled one when possible
    ///
    /// Live connections are tried in load order Idle, Normal, Busy; the
    /// chosen one gains a load tick. Overloaded connections are skipped but
    /// kept. When nothing is reusable a new connection is dialed outside the
    /// pool lock. Dial errors are returned as is.
    pub async fn connect(&self, endpoint: &str) -> ConnectorResult<Arc<Connection>> {
        if self.is_shut_down() {
            return Err(ConnectorError::PoolShutDown);
        }
        let key = endpoint_key(endpoint);

        if let Some(connection) = self.reuse(&key).await {
            self.inner.metrics.connection_reused();
            debug!(
                "Reusing connection {} for {endpoint} ({})",
                connection.id(),
                connection.load()
            );
            return Ok(connection);
        }

        let dialed = match &self.inner.tls {
            Some(tls) => Connection::dial_with_tls(endpoint, Arc::clone(&self.inner.config), Arc::clone(tls)).await,
            None => Connection::dial(endpoint, Arc::clone(&self.inner.config)).await,
        };
        let connection = match dialed {
            Ok(connection) => connection,
            Err(e) => {
                self.inner.metrics.dial_failed();
                warn!("Failed to dial {endpoint}: {e}");
                return Err(e);
            }
        };
        self.inner.metrics.connection_dialed();

        self.insert(key, Arc::clone(&connection)).await?;
        Ok(connection)
    }

    /// Scan the endpoint's connections under the pool lock
    async fn reuse(&self, key: &str) -> Option<Arc<Connection>> {
        let pooled = self.inner.connections.lock().await;
        let candidates = pooled.get(key)?;

        for class in LoadClass::REUSABLE {
            for connection in candidates {
                if !connection.is_connected() || connection.load() != class {
                    continue;
                }
                connection.add_load(1);
                // The monitor may have closed it since the check above
                if connection.is_connected() {
                    return Some(Arc::clone(connection));
                }
            }
        }
        None
    }

    /// Pool an externally created connection under `endpoint`
    pub async fn adopt(&self, endpoint: &str, connection: Arc<Connection>) -> ConnectorResult<()> {
        if self.is_shut_down() {
            return Err(ConnectorError::PoolShutDown);
        }
        self.insert(endpoint_key(endpoint), connection).await
    }

    async fn insert(&self, key: String, connection: Arc<Connection>) -> ConnectorResult<()> {
        {
            let mut pooled = self.inner.connections.lock().await;
            // Shutdown drains under this lock, so checking here cannot race it
            if self.is_shut_down() {
                drop(pooled);
                connection.close().await;
                return Err(ConnectorError::PoolShutDown);
            }
            pooled.entry(key.clone()).or_default().push(Arc::clone(&connection));
        }

        spawn_watcher(Arc::downgrade(&self.inner), key, &connection);
        Ok(())
    }

    /// Total number of pooled connections
    pub async fn len(&self) -> usize {
        self.inner.connections.lock().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of the connections pooled under `endpoint`
    pub async fn connections(&self, endpoint: &str) -> Vec<Arc<Connection>> {
        self.inner
            .connections
            .lock()
            .await
            .get(&endpoint_key(endpoint))
            .cloned()
            .unwrap_or_default()
    }

    /// Close every pooled connection and refuse further use
    pub async fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<Arc<Connection>> = {
            let mut pooled = self.inner.connections.lock().await;
            pooled.drain().flat_map(|(_, list)| list).collect()
        };
        info!("Shutting down connection pool ({} connections)", drained.len());

        for connection in drained {
            connection.close().await;
            self.inner.metrics.connection_removed();
        }
    }
}

/// Remove `connection` from the pool once it disconnects
fn spawn_watcher(pool: Weak<PoolInner>, key: String, connection: &Arc<Connection>) {
    let id = connection.id();
    let mut connected = connection.subscribe();

    tokio::spawn(async move {
        // Err means the connection itself is gone, which also ends its pooling
        let _ = connected.wait_for(|connected| !connected).await;

        let Some(pool) = pool.upgrade() else {
            return;
        };
        let mut pooled = pool.connections.lock().await;
        let Some(list) = pooled.get_mut(&key) else {
            return;
        };
        let before = list.len();
        list.retain(|connection| connection.id() != id);
        if list.len() < before {
            pool.metrics.connection_removed();
            debug!("Removed connection {id} from pool for {key}");
        }
        if list.is_empty() {
            pooled.remove(&key);
        }
    });
}

/// Registry key: the endpoint as parsed and re-serialized when it is a URL
fn endpoint_key(endpoint: &str) -> String {
    Url::parse(endpoint).map_or_else(|_| endpoint.to_string(), String::from)
}
