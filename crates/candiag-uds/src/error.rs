//! UDS client-side errors

use thiserror::Error;

use crate::nrc::NegativeResponseCode;

#[derive(Debug, Error, Clone)]
pub enum UdsError {
    #[error("Negative response: {nrc} (0x{nrc:02X}) for service 0x{service_id:02X}")]
    NegativeResponse {
        service_id: u8,
        nrc: NegativeResponseCode,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Response timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl UdsError {
    /// True when the ECU definitively answered (negatively) or the
    /// reply was malformed - cases a scanner treats as terminal for the
    /// current DID, as opposed to a timeout worth retrying.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UdsError::Timeout)
    }
}
