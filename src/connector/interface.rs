// ABOUTME: Logical request/response channel multiplexed over a Connection
//
// Each interface has one response slot that the connection's reader task
// fills. A request clears the slot, sends its frame and waits for either the
// slot to be filled, the connection to drop, or the timeout to pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::debug;

use super::connection::{lock, Connection};
use super::error::{ConnectorError, ConnectorResult};

/// Response slot shared between an interface and the reader task
#[derive(Debug, Default)]
pub(crate) struct ResponseSlot {
    pending: Mutex<Option<Value>>,
    awaiting: AtomicBool,
    notify: Notify,
}

impl ResponseSlot {
    /// Store a response and wake the requester
    pub(crate) fn fill(&self, value: Value) {
        *lock(&self.pending) = Some(value);
        self.notify.notify_one();
    }

    fn take(&self) -> Option<Value> {
        lock(&self.pending).take()
    }

    pub(crate) fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::SeqCst)
    }

    fn set_awaiting(&self, awaiting: bool) {
        self.awaiting.store(awaiting, Ordering::SeqCst);
    }
}

/// Handle for one logical channel on a [`Connection`]
///
/// Dropping the handle closes the interface.
pub struct Interface {
    id: i32,
    connection: Arc<Connection>,
    slot: Arc<ResponseSlot>,
    /// Serializes requests; at most one in flight
    request_lock: AsyncMutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("id", &self.id)
            .field("connection", &self.connection.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Interface {
    pub(crate) fn new(id: i32, connection: Arc<Connection>, slot: Arc<ResponseSlot>) -> Self {
        Self {
            id,
            connection,
            slot,
            request_lock: AsyncMutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Interface id, unique within its connection
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// Connection this interface belongs to
    pub const fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Closed explicitly, or implicitly because the connection is gone
    pub fn is_closed(&self) -> bool {
        !self.connection.is_connected() || self.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait up to the configured request timeout
    pub async fn request<Req, Resp>(&self, request_type: &str, payload: &Req) -> ConnectorResult<Option<Resp>>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let timeout = self.connection.config().request_timeout;
        self.request_with_timeout(request_type, payload, timeout).await
    }

    /// Send a request and wait up to `timeout` for the response
    ///
    /// Returns `Ok(None)` when no usable response arrived: the timeout
    /// passed, the connection dropped, or the payload did not decode as
    /// `Resp`.
    pub async fn request_with_timeout<Req, Resp>(
        &self,
        request_type: &str,
        payload: &Req,
        timeout: Duration,
    ) -> ConnectorResult<Option<Resp>>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let _in_flight = self.request_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::InterfaceClosed(self.id));
        }

        self.slot.take();
        self.connection.send_request(self.id, request_type, payload).await?;

        self.slot.set_awaiting(true);
        let response = tokio::time::timeout(timeout, self.wait_for_response())
            .await
            .ok()
            .flatten();
        self.slot.set_awaiting(false);

        let Some(value) = response else {
            debug!("Interface {} got no response to {request_type}", self.id);
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                debug!("Interface {} could not decode {request_type} response: {e}", self.id);
                Ok(None)
            }
        }
    }

    /// Wait until the slot is filled or the connection goes away
    async fn wait_for_response(&self) -> Option<Value> {
        let mut connected = self.connection.subscribe();
        loop {
            if let Some(value) = self.slot.take() {
                return Some(value);
            }
            if !*connected.borrow_and_update() {
                return None;
            }
            tokio::select! {
                () = self.slot.notify.notified() => {}
                changed = connected.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Close the interface
    ///
    /// Idempotent, and safe after the connection has died.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.connection.close_interface(self.id);
        }
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        self.close();
    }
}
