//! Scanner errors

use candiag_can::{FrameError, TransportError};
use candiag_uds::UdsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Scan cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("UDS error: {0}")]
    Uds(#[from] UdsError),
}
