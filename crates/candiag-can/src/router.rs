//! CAN identifier routing
//!
//! One task reads the shared transport; every diagnostic session owns an
//! [`Endpoint`] registered for its receive identifier. Frames matching
//! no endpoint are normal bus noise and are dropped. Delivery never
//! blocks on a slow consumer: each endpoint has a bounded queue and a
//! full queue drops the incoming frame (diagnostic traffic is strictly
//! request/response, so a frame that cannot be consumed now is worthless
//! by the time the queue drains).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::frame::CanFrame;
use crate::transport::{CanTransport, TransportError};

/// Default per-endpoint queue depth, in frames.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// How often the read loop re-checks the shutdown flag when the bus is
/// quiet.
const READ_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Two sessions owning one identifier would corrupt routing, so a
    /// duplicate registration is a hard setup error.
    #[error("CAN identifier 0x{0:X} already has a registered endpoint")]
    IdInUse(u32),
}

#[derive(Debug)]
struct EndpointSlot {
    tx: mpsc::Sender<CanFrame>,
    dropped: Arc<AtomicU64>,
}

#[derive(Debug)]
struct RouterShared {
    endpoints: RwLock<HashMap<u32, EndpointSlot>>,
}

/// Demultiplexes one shared transport to per-identifier endpoints.
pub struct CanIdRouter {
    transport: Arc<dyn CanTransport>,
    shared: Arc<RouterShared>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CanIdRouter {
    pub fn new(transport: Arc<dyn CanTransport>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            transport,
            shared: Arc::new(RouterShared {
                endpoints: RwLock::new(HashMap::new()),
            }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Register an endpoint for `rx_id` with the default queue depth.
    pub fn register(&self, rx_id: u32) -> Result<Endpoint, RouterError> {
        self.register_with_depth(rx_id, DEFAULT_QUEUE_DEPTH)
    }

    /// Register an endpoint for `rx_id`. Fails if the identifier is
    /// already owned; the identifier becomes reusable once the returned
    /// [`Endpoint`] is dropped.
    pub fn register_with_depth(&self, rx_id: u32, depth: usize) -> Result<Endpoint, RouterError> {
        let mut endpoints = self.shared.endpoints.write();
        if endpoints.contains_key(&rx_id) {
            return Err(RouterError::IdInUse(rx_id));
        }

        let (tx, rx) = mpsc::channel(depth.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        endpoints.insert(
            rx_id,
            EndpointSlot {
                tx,
                dropped: dropped.clone(),
            },
        );
        debug!(rx_id = format!("0x{:X}", rx_id), depth, "Endpoint registered");

        Ok(Endpoint {
            rx_id,
            rx,
            dropped,
            shared: self.shared.clone(),
        })
    }

    /// Start the single read loop over the transport. Idempotent: a
    /// second call while the loop is running does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let transport = self.transport.clone();
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    received = transport.recv_frame(READ_POLL) => {
                        match received {
                            Ok(Some(frame)) => Self::dispatch_to(&shared, frame),
                            Ok(None) => {}
                            Err(TransportError::ConnectionClosed) => {
                                debug!("Transport closed, router read loop exiting");
                                break;
                            }
                            Err(e) => {
                                error!(error = %e, "Router read loop transport error");
                                break;
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Deliver one frame to the endpoint owning its identifier.
    ///
    /// Exposed so alternative frame pumps (and tests) can feed the
    /// router directly; the internal read loop goes through the same
    /// path.
    pub fn dispatch(&self, frame: CanFrame) {
        Self::dispatch_to(&self.shared, frame);
    }

    fn dispatch_to(shared: &RouterShared, frame: CanFrame) {
        let endpoints = shared.endpoints.read();
        let Some(slot) = endpoints.get(&frame.id()) else {
            trace!(id = format!("0x{:X}", frame.id()), "Unroutable frame dropped");
            return;
        };

        match slot.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                // Drop-newest policy: the queue already holds older
                // frames the consumer has not taken; this one loses.
                let total = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    id = format!("0x{:X}", frame.id()),
                    dropped_total = total,
                    "Endpoint queue full, frame dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Endpoint torn down between lookup and send; its map
                // entry is about to disappear.
            }
        }
    }

    /// Stop the read loop and wait for it to exit. Registered endpoints
    /// stay valid; they just stop receiving.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// The transport this router reads from; sessions transmit through
    /// it directly (each send is one atomic frame).
    pub fn transport(&self) -> Arc<dyn CanTransport> {
        self.transport.clone()
    }
}

/// A registered receive identifier with its inbound frame queue.
///
/// Dropping the endpoint unregisters the identifier first, then
/// releases the queue, so the router can never dispatch into a
/// torn-down endpoint.
#[derive(Debug)]
pub struct Endpoint {
    rx_id: u32,
    rx: mpsc::Receiver<CanFrame>,
    dropped: Arc<AtomicU64>,
    shared: Arc<RouterShared>,
}

impl Endpoint {
    pub fn rx_id(&self) -> u32 {
        self.rx_id
    }

    /// Frames discarded because this endpoint's queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait up to `timeout` for the next frame, in arrival order.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<CanFrame> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Take the next already-queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<CanFrame> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shared.endpoints.write().remove(&self.rx_id);
        debug!(rx_id = format!("0x{:X}", self.rx_id), "Endpoint unregistered");
    }
}
