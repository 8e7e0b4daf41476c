//! Frame-level transport trait and errors

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::frame::CanFrame;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),
}

/// Frame pump over one physical (or virtual) CAN interface.
///
/// The adapter behind this trait owns bus bring-up, bit timing and
/// hardware filters. Each `send_frame` call transmits one atomic frame,
/// so concurrent senders can interleave without corrupting frame
/// boundaries.
#[async_trait]
pub trait CanTransport: Send + Sync {
    /// Transmit a single frame.
    async fn send_frame(&self, frame: CanFrame) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next frame. `Ok(None)` means the
    /// deadline passed quietly; errors are reserved for a broken
    /// transport.
    async fn recv_frame(&self, timeout: Duration) -> Result<Option<CanFrame>, TransportError>;

    /// Bring up the CAN channel at the given bitrate. Adapters without
    /// runtime bring-up (virtual buses, pre-configured interfaces)
    /// accept any bitrate.
    async fn open_channel(&self, _bitrate: u32) -> Result<(), TransportError> {
        Ok(())
    }

    /// Install a hardware acceptance filter. Optional; the default is
    /// an open filter.
    async fn set_filter(&self, _id: u32, _mask: u32) -> Result<(), TransportError> {
        Ok(())
    }
}
