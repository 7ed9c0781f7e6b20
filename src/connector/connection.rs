// ABOUTME: One multiplexed connector session with its monitor and reader tasks
//
// A Connection owns an upgraded stream shared by many interfaces:
// - Writes are serialized by the send lock
// - The reader task routes response frames to interfaces by id
// - The monitor task sends keepalive pings, decays load and reaps the
//   connection once it has been idle long enough

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_rustls::rustls::ClientConfig;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::codec::{self, Frame, RequestFrame, ResponseFrame};
use super::config::ConnectorConfig;
use super::error::{ConnectorError, ConnectorResult};
use super::handshake::{self, BoxedTransport, Transport};
use super::interface::{Interface, ResponseSlot};
use super::load::{LoadClass, LoadTracker, LoadVerdict};
use super::metrics::ConnectionMetrics;

type SessionStream = BufReader<BoxedTransport>;

/// Frame handed to the send lock
enum Outgoing<'a> {
    Ping,
    Request(&'a RequestFrame),
}

/// A dialed connector session carrying many interfaces
pub struct Connection {
    /// Identifier used in logs
    id: Uuid,

    /// Endpoint this connection was dialed to
    endpoint: String,

    config: Arc<ConnectorConfig>,

    /// Connected flag; receivers observe the transition to false
    connected: watch::Sender<bool>,

    /// Send lock around the write half
    writer: AsyncMutex<Option<WriteHalf<SessionStream>>>,

    /// Registered interfaces by id
    interfaces: Mutex<HashMap<i32, Arc<ResponseSlot>>>,

    next_interface_id: AtomicI32,

    load_ticks: AtomicU64,

    /// Time of the last frame written
    last_send: Mutex<Instant>,

    /// Reader and monitor task handles
    tasks: Mutex<Vec<JoinHandle<()>>>,

    metrics: ConnectionMetrics,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("load_ticks", &self.load_ticks())
            .field("interfaces", &self.interface_count())
            .finish()
    }
}

impl Connection {
    /// Dial `endpoint`, perform the upgrade and start the background tasks
    pub async fn dial(endpoint: &str, config: Arc<ConnectorConfig>) -> ConnectorResult<Arc<Self>> {
        Self::dial_inner(endpoint, config, None).await
    }

    /// Like [`Connection::dial`], with a caller-supplied TLS client config
    pub async fn dial_with_tls(
        endpoint: &str,
        config: Arc<ConnectorConfig>,
        tls: Arc<ClientConfig>,
    ) -> ConnectorResult<Arc<Self>> {
        Self::dial_inner(endpoint, config, Some(tls)).await
    }

    async fn dial_inner(
        endpoint: &str,
        config: Arc<ConnectorConfig>,
        tls: Option<Arc<ClientConfig>>,
    ) -> ConnectorResult<Arc<Self>> {
        let stream = handshake::dial(endpoint, &config, tls.as_ref()).await?;
        let connection = Self::start(endpoint, stream, config);
        info!("Connected to {endpoint} (connection {})", connection.id);
        Ok(connection)
    }

    /// Adopt a stream that has already been upgraded
    ///
    /// Used for custom transports and in-memory test pipes.
    pub fn from_stream<S>(endpoint: &str, stream: S, config: Arc<ConnectorConfig>) -> Arc<Self>
    where
        S: Transport,
    {
        let transport: BoxedTransport = Box::new(stream);
        Self::start(endpoint, BufReader::new(transport), config)
    }

    fn start(endpoint: &str, stream: SessionStream, config: Arc<ConnectorConfig>) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(stream);
        let (connected, _) = watch::channel(true);

        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            config,
            connected,
            writer: AsyncMutex::new(Some(writer)),
            interfaces: Mutex::new(HashMap::new()),
            next_interface_id: AtomicI32::new(0),
            load_ticks: AtomicU64::new(0),
            last_send: Mutex::new(Instant::now()),
            tasks: Mutex::new(Vec::new()),
            metrics: ConnectionMetrics::new(),
        });

        let monitor = tokio::spawn(Arc::clone(&connection).monitor_loop());
        let reader = tokio::spawn(Arc::clone(&connection).reader_loop(reader));
        lock(&connection.tasks).extend([monitor, reader]);

        connection
    }

    /// Identifier used in logs
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Endpoint this connection belongs to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Configuration this connection runs with
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Whether the session is still usable
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Current load class, derived from the tick count
    pub fn load(&self) -> LoadClass {
        LoadClass::from_ticks(self.load_ticks())
    }

    /// Current load tick count
    pub fn load_ticks(&self) -> u64 {
        self.load_ticks.load(Ordering::SeqCst)
    }

    /// Number of registered interfaces
    pub fn interface_count(&self) -> usize {
        lock(&self.interfaces).len()
    }

    /// Connection metrics
    pub const fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    /// Subscribe to the connected flag
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Wait until the connection has been closed
    pub async fn closed(&self) {
        let mut rx = self.subscribe();
        // Sender lives as long as self, so this only ends on disconnect
        let _ = rx.wait_for(|connected| !connected).await;
    }

    pub(crate) fn add_load(&self, ticks: u64) {
        self.load_ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Open a new logical interface on this connection
    pub fn create_interface(self: &Arc<Self>) -> ConnectorResult<Interface> {
        if !self.is_connected() {
            return Err(ConnectorError::Disconnected);
        }

        let id = self
            .next_interface_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| ConnectorError::InterfaceIdsExhausted)?;

        let slot = Arc::new(ResponseSlot::default());
        lock(&self.interfaces).insert(id, Arc::clone(&slot));
        self.add_load(1);

        debug!("Connection {} opened interface {id}", self.id);
        Ok(Interface::new(id, Arc::clone(self), slot))
    }

    /// Remove an interface from the registry
    pub fn close_interface(&self, interface_id: i32) {
        if lock(&self.interfaces).remove(&interface_id).is_some() {
            debug!("Connection {} closed interface {interface_id}", self.id);
        }
    }

    /// Write a request frame addressed to `interface_id`
    pub async fn send_request<T>(&self, interface_id: i32, request_type: &str, payload: &T) -> ConnectorResult<()>
    where
        T: Serialize + ?Sized,
    {
        let frame = RequestFrame {
            target: interface_id,
            request_type: request_type.to_string(),
            payload: serde_json::to_string(payload)?,
        };

        match self.write_frame(Outgoing::Request(&frame)).await {
            Ok(()) => {}
            Err(ConnectorError::Io(e)) => {
                warn!("Connection {} write failed: {e}", self.id);
                self.close().await;
                return Err(e.into());
            }
            Err(e) => return Err(e),
        }

        self.add_load(1);
        self.metrics.request_sent();
        debug!(
            "Connection {} sent {request_type} to interface {interface_id}",
            self.id
        );
        Ok(())
    }

    /// Close the connection
    ///
    /// Idempotent; only the first caller tears the stream down.
    pub async fn close(&self) {
        if !self.connected.send_replace(false) {
            return;
        }
        info!("Closing connection {} to {}", self.id, self.endpoint);

        lock(&self.interfaces).clear();

        // Reader may be parked in a read; aborting it drops the read half
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }

        // Writers give up the send lock once they observe the disconnect
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = tokio::time::timeout(self.config.monitor_interval, writer.shutdown()).await;
        }
    }

    /// Count interfaces with a request in flight
    fn busy_interfaces(&self) -> usize {
        lock(&self.interfaces)
            .values()
            .filter(|slot| slot.is_awaiting())
            .count()
    }

    async fn send_ping(&self) -> ConnectorResult<()> {
        self.write_frame(Outgoing::Ping).await?;
        self.metrics.ping_sent();
        Ok(())
    }

    /// Write one frame under the send lock
    ///
    /// Waiting for the lock and the write itself are abandoned as soon as
    /// the connection is marked disconnected, so a peer that stopped reading
    /// cannot keep `close()` from taking the writer.
    async fn write_frame(&self, frame: Outgoing<'_>) -> ConnectorResult<()> {
        let mut connected = self.subscribe();
        let write = async {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(ConnectorError::Disconnected)?;
            match frame {
                Outgoing::Ping => codec::encode_ping(writer).await?,
                Outgoing::Request(request) => codec::encode_request(writer, request).await?,
            }
            *lock(&self.last_send) = Instant::now();
            Ok::<(), ConnectorError>(())
        };

        tokio::select! {
            result = write => result,
            _ = connected.wait_for(|connected| !connected) => Err(ConnectorError::Disconnected),
        }
    }

    /// Keepalive, load decay and idle reaping
    async fn monitor_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.monitor_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tracker = LoadTracker::new(
            self.config.load_decay_interval,
            self.config.idle_timeout,
            Instant::now(),
        );

        while self.is_connected() {
            interval.tick().await;
            if !self.is_connected() {
                break;
            }
            let now = Instant::now();

            let since_send = now.duration_since(*lock(&self.last_send));
            if since_send >= self.config.keepalive_interval {
                if let Err(e) = self.send_ping().await {
                    warn!("Connection {} keepalive failed: {e}", self.id);
                    // Closing aborts this task, so hand it off
                    let connection = Arc::clone(&self);
                    tokio::spawn(async move { connection.close().await });
                    break;
                }
                debug!("Connection {} sent keepalive", self.id);
            }

            let ticks = self.load_ticks();
            match tracker.observe(ticks, || self.busy_interfaces(), now) {
                LoadVerdict::Hold => {}
                LoadVerdict::Decay => {
                    let previous = self
                        .load_ticks
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| t.checked_sub(1))
                        .unwrap_or(0);
                    tracker.decayed(previous.saturating_sub(1), now);
                }
                LoadVerdict::Reap => {
                    info!(
                        "Connection {} idle for {:?}, closing",
                        self.id, self.config.idle_timeout
                    );
                    let connection = Arc::clone(&self);
                    tokio::spawn(async move { connection.close().await });
                    break;
                }
            }
        }
    }

    /// Route response frames to interfaces until the stream fails
    async fn reader_loop(self: Arc<Self>, mut reader: ReadHalf<SessionStream>) {
        let max_len = self.config.max_frame_len;
        loop {
            match codec::decode_response(&mut reader, max_len).await {
                Ok(Frame::Ping) => {}
                Ok(Frame::Data(frame)) => self.route(frame),
                Err(e) => {
                    if self.is_connected() {
                        warn!("Connection {} read failed: {e}", self.id);
                    }
                    break;
                }
            }
        }

        // Closing aborts this task, so hand it off
        let connection = Arc::clone(&self);
        tokio::spawn(async move { connection.close().await });
    }

    fn route(&self, frame: ResponseFrame) {
        let slot = lock(&self.interfaces).get(&frame.target).cloned();
        let Some(slot) = slot else {
            debug!(
                "Connection {} dropped response for unknown interface {}",
                self.id, frame.target
            );
            self.metrics.response_dropped();
            return;
        };

        match serde_json::from_str::<Value>(&frame.payload) {
            Ok(value) => {
                slot.fill(value);
                self.metrics.response_routed();
            }
            Err(e) => {
                debug!(
                    "Connection {} ignored undecodable response for interface {}: {e}",
                    self.id, frame.target
                );
                self.metrics.response_dropped();
            }
        }
    }
}

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
