//! CAN layer for candiag: frames, transports and identifier routing.
//!
//! This crate deliberately stops at the frame level. Bus bring-up,
//! bit timing and hardware filters live behind [`CanTransport`];
//! ISO-TP segmentation lives behind [`IsoTpChannel`]. What this crate
//! owns is the part that needs care when several diagnostic sessions
//! share one interface: the [`CanIdRouter`] that fans incoming frames
//! out to per-identifier endpoints without ever blocking on a slow
//! consumer.

mod frame;
mod isotp;
mod router;
mod transport;
mod virtual_bus;

#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod socketcan;

pub use frame::{CanFrame, FrameError, FrameFlags, CLASSIC_FRAME_DATA, MAX_FRAME_DATA};
pub use isotp::{memory_channel_pair, IsoTpChannel, MemoryIsoTpChannel, SingleFrameChannel};
pub use router::{CanIdRouter, Endpoint, RouterError, DEFAULT_QUEUE_DEPTH};
pub use transport::{CanTransport, TransportError};
pub use virtual_bus::{VirtualBus, VirtualBusPort};
