//! Raw SocketCAN transport (Linux only, `socketcan` feature)
//!
//! Classic CAN frames over a nonblocking kernel socket. Reads poll the
//! socket from a blocking task so the async side keeps its deadline
//! semantics. FD frames are not handled here; the kernel ISO-TP stack
//! is the right home for anything beyond raw classic frames.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use socketcan::{CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId};
use tracing::debug;

use crate::frame::{CanFrame, FrameFlags};
use crate::transport::{CanTransport, TransportError};

pub struct SocketCanTransport {
    interface: String,
    socket: Arc<std::sync::Mutex<CanSocket>>,
}

impl SocketCanTransport {
    /// Open an already-configured interface (e.g. "can0", "vcan0").
    /// Bitrate and bus bring-up are `ip link` territory on Linux.
    pub fn open(interface: &str) -> Result<Self, TransportError> {
        let socket = CanSocket::open(interface).map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to open CAN socket on {}: {}",
                interface, e
            ))
        })?;
        socket.set_nonblocking(true).map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to set non-blocking: {}", e))
        })?;

        debug!(interface, "SocketCAN transport open");
        Ok(Self {
            interface: interface.to_string(),
            socket: Arc::new(std::sync::Mutex::new(socket)),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

fn to_socketcan(frame: &CanFrame) -> Result<socketcan::CanFrame, TransportError> {
    let built = if frame.is_extended() {
        let id = ExtendedId::new(frame.id())
            .ok_or_else(|| TransportError::SendFailed(format!("Bad 29-bit id 0x{:X}", frame.id())))?;
        socketcan::CanFrame::new(id, frame.data())
    } else {
        let id = StandardId::new(frame.id() as u16)
            .ok_or_else(|| TransportError::SendFailed(format!("Bad 11-bit id 0x{:X}", frame.id())))?;
        socketcan::CanFrame::new(id, frame.data())
    };
    built.ok_or_else(|| {
        TransportError::SendFailed(format!("{} data bytes do not fit a classic frame", frame.data().len()))
    })
}

fn from_socketcan(frame: &socketcan::CanFrame) -> Result<CanFrame, TransportError> {
    let flags = FrameFlags {
        extended: frame.is_extended(),
        ..FrameFlags::default()
    };
    CanFrame::with_flags(frame.raw_id(), frame.data().to_vec(), flags)
        .map_err(|e| TransportError::ReceiveFailed(e.to_string()))
}

#[async_trait]
impl CanTransport for SocketCanTransport {
    async fn send_frame(&self, frame: CanFrame) -> Result<(), TransportError> {
        let raw = to_socketcan(&frame)?;
        let socket = self.socket.clone();
        tokio::task::spawn_blocking(move || {
            let socket = socket.lock().expect("CAN socket lock poisoned");
            socket
                .write_frame(&raw)
                .map_err(|e| TransportError::SendFailed(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::SendFailed(format!("send task join error: {}", e)))?
    }

    async fn recv_frame(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        let socket = self.socket.clone();
        tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + timeout;
            loop {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                let read = {
                    let socket = socket.lock().expect("CAN socket lock poisoned");
                    socket.read_frame()
                };
                match read {
                    Ok(frame) => return from_socketcan(&frame).map(Some),
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
                }
            }
        })
        .await
        .map_err(|e| TransportError::ReceiveFailed(format!("recv task join error: {}", e)))?
    }
}
