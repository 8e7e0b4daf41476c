//! ISO-TP channel seam
//!
//! Segmentation and flow control are an external concern: the emulator
//! and scanner only ever see a byte-stream-in/byte-stream-out channel
//! per (tx-id, rx-id) pair. [`SingleFrameChannel`] implements the
//! degenerate no-segmentation case (ISO 15765-2 single frames, classic
//! and FD escape encoding) on top of a router endpoint, which is all
//! the in-process emulation and the tests need. A kernel ISO-TP socket
//! slots in behind the same trait for real multi-frame traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::frame::{CanFrame, FrameFlags, CLASSIC_FRAME_DATA};
use crate::router::Endpoint;
use crate::transport::{CanTransport, TransportError};

/// Largest payload of a classic single frame (PCI nibble encoding).
const SF_CLASSIC_MAX: usize = 7;

/// Largest payload of an FD single frame (escape encoding: 0x00, len).
const SF_FD_MAX: usize = 62;

/// Opaque reassembled-payload channel for one (tx-id, rx-id) pair.
#[async_trait]
pub trait IsoTpChannel: Send + Sync {
    /// Send one complete payload.
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next complete payload; `Ok(None)`
    /// on a quiet deadline.
    async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Single-frame-only ISO-TP channel over a routed endpoint.
pub struct SingleFrameChannel {
    transport: Arc<dyn CanTransport>,
    endpoint: tokio::sync::Mutex<Endpoint>,
    tx_id: u32,
    fd: bool,
}

impl SingleFrameChannel {
    /// Classic-CAN channel: payloads up to 7 bytes, frames padded to 8.
    pub fn new(transport: Arc<dyn CanTransport>, endpoint: Endpoint, tx_id: u32) -> Self {
        Self {
            transport,
            endpoint: tokio::sync::Mutex::new(endpoint),
            tx_id,
            fd: false,
        }
    }

    /// FD channel: payloads up to 62 bytes via the escape encoding.
    pub fn new_fd(transport: Arc<dyn CanTransport>, endpoint: Endpoint, tx_id: u32) -> Self {
        Self {
            transport,
            endpoint: tokio::sync::Mutex::new(endpoint),
            tx_id,
            fd: true,
        }
    }
}

fn encode_single_frame(payload: &[u8], fd: bool) -> Result<(Vec<u8>, bool), TransportError> {
    if payload.len() <= SF_CLASSIC_MAX {
        let mut data = Vec::with_capacity(CLASSIC_FRAME_DATA);
        data.push(payload.len() as u8);
        data.extend_from_slice(payload);
        data.resize(CLASSIC_FRAME_DATA, 0x00);
        return Ok((data, false));
    }
    if fd && payload.len() <= SF_FD_MAX {
        let mut data = Vec::with_capacity(2 + payload.len());
        data.push(0x00);
        data.push(payload.len() as u8);
        data.extend_from_slice(payload);
        return Ok((data, true));
    }
    Err(TransportError::SendFailed(format!(
        "payload of {} bytes needs multi-frame ISO-TP, which this channel does not do",
        payload.len()
    )))
}

fn decode_single_frame(data: &[u8]) -> Option<Vec<u8>> {
    let pci = *data.first()?;
    match pci >> 4 {
        0x0 => {
            let len = (pci & 0x0F) as usize;
            if len > 0 && data.len() > len {
                Some(data[1..1 + len].to_vec())
            } else if len == 0 && data.len() >= 2 {
                // FD escape: SF_DL in the second byte.
                let len = data[1] as usize;
                if data.len() >= 2 + len {
                    Some(data[2..2 + len].to_vec())
                } else {
                    None
                }
            } else {
                None
            }
        }
        // First/consecutive/flow-control frames belong to a real
        // ISO-TP stack, not to this channel.
        _ => None,
    }
}

#[async_trait]
impl IsoTpChannel for SingleFrameChannel {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let (data, fd) = encode_single_frame(payload, self.fd)?;
        let flags = FrameFlags {
            extended: self.tx_id > 0x7FF,
            fd,
            brs: false,
        };
        let frame = CanFrame::with_flags(self.tx_id, data, flags)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.transport.send_frame(frame).await
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut endpoint = self.endpoint.lock().await;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match endpoint.recv_timeout(remaining).await {
                Some(frame) => match decode_single_frame(frame.data()) {
                    Some(payload) => return Ok(Some(payload)),
                    None => {
                        trace!(
                            id = format!("0x{:X}", frame.id()),
                            "Non-single-frame PDU ignored"
                        );
                    }
                },
                None => return Ok(None),
            }
        }
    }
}

/// One end of an in-memory ISO-TP channel pair.
///
/// Bypasses the bus entirely; handy for exercising a dispatcher or a
/// client without CAN framing in the way.
pub struct MemoryIsoTpChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// Cross-connected channel pair: what one end sends, the other receives.
pub fn memory_channel_pair() -> (MemoryIsoTpChannel, MemoryIsoTpChannel) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryIsoTpChannel {
            tx: a_tx,
            rx: tokio::sync::Mutex::new(a_rx),
        },
        MemoryIsoTpChannel {
            tx: b_tx,
            rx: tokio::sync::Mutex::new(b_rx),
        },
    )
}

#[async_trait]
impl IsoTpChannel for MemoryIsoTpChannel {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(payload)) => Ok(Some(payload)),
            Ok(None) => Err(TransportError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classic_single_frame_is_padded() {
        let (data, fd) = encode_single_frame(&[0x3E, 0x00], false).unwrap();
        assert!(!fd);
        assert_eq!(data, vec![0x02, 0x3E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn fd_escape_used_above_seven_bytes() {
        let payload: Vec<u8> = (0u8..9).collect();
        let (data, fd) = encode_single_frame(&payload, true).unwrap();
        assert!(fd);
        assert_eq!(data[0], 0x00);
        assert_eq!(data[1], 9);
        assert_eq!(&data[2..], payload.as_slice());
    }

    #[test]
    fn oversize_payload_rejected() {
        assert!(encode_single_frame(&[0u8; 8], false).is_err());
        assert!(encode_single_frame(&[0u8; 63], true).is_err());
    }

    #[test]
    fn decode_round_trips_both_encodings() {
        for payload in [vec![0x7E, 0x00], (0u8..30).collect::<Vec<u8>>()] {
            let (data, _) = encode_single_frame(&payload, true).unwrap();
            assert_eq!(decode_single_frame(&data), Some(payload));
        }
    }

    #[test]
    fn decode_ignores_flow_control_and_garbage() {
        assert_eq!(decode_single_frame(&[0x30, 0x00, 0x00]), None); // FC
        assert_eq!(decode_single_frame(&[0x21, 1, 2, 3]), None); // CF
        assert_eq!(decode_single_frame(&[]), None);
    }

    #[tokio::test]
    async fn memory_pair_crosses_over() {
        let (a, b) = memory_channel_pair();
        a.send(&[1, 2, 3]).await.unwrap();
        let got = b.recv(Duration::from_millis(50)).await.unwrap();
        assert_eq!(got, Some(vec![1, 2, 3]));

        let quiet = a.recv(Duration::from_millis(10)).await.unwrap();
        assert!(quiet.is_none());
    }
}
