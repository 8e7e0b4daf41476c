//! In-memory CAN bus for tests and demos
//!
//! Every frame written to one port is seen by every other port, like a
//! real shared-medium bus (minus arbitration and error frames). Used by
//! the integration tests to stand in for a vcan interface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::frame::CanFrame;
use crate::transport::{CanTransport, TransportError};

struct BusInner {
    // Slot index == port index; a dropped port leaves a None slot.
    ports: Mutex<Vec<Option<mpsc::UnboundedSender<CanFrame>>>>,
}

/// A shared in-memory bus. Clone-free: attach as many ports as needed.
#[derive(Clone)]
pub struct VirtualBus {
    inner: Arc<BusInner>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                ports: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Attach a new port. The port sees all frames sent by other ports,
    /// never its own.
    pub fn attach(&self) -> VirtualBusPort {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ports = self.inner.ports.lock();
        let index = ports.len();
        ports.push(Some(tx));
        VirtualBusPort {
            index,
            inner: self.inner.clone(),
            rx: tokio::sync::Mutex::new(rx),
        }
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One attachment point on a [`VirtualBus`], usable as a [`CanTransport`].
pub struct VirtualBusPort {
    index: usize,
    inner: Arc<BusInner>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<CanFrame>>,
}

impl Drop for VirtualBusPort {
    fn drop(&mut self) {
        self.inner.ports.lock()[self.index] = None;
    }
}

#[async_trait]
impl CanTransport for VirtualBusPort {
    async fn send_frame(&self, frame: CanFrame) -> Result<(), TransportError> {
        let ports = self.inner.ports.lock();
        for (i, slot) in ports.iter().enumerate() {
            if i == self.index {
                continue;
            }
            if let Some(tx) = slot {
                // A receiver that went away mid-send is equivalent to a
                // node dropping off the bus; not an error for the sender.
                let _ = tx.send(frame.clone());
            }
        }
        Ok(())
    }

    async fn recv_frame(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(TransportError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }
}
