//! UDS wire grammar: service identifiers, requests, responses

use crate::nrc::NegativeResponseCode;

/// Standard UDS service ID constants
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_INFO: u8 = 0x19;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;

    /// A positive response echoes the service ID plus this offset.
    pub const POSITIVE_OFFSET: u8 = 0x40;
}

/// Build the wire form of a positive response for a service.
pub fn positive_response(sid: u8, data: &[u8]) -> Vec<u8> {
    let mut response = Vec::with_capacity(1 + data.len());
    response.push(sid.wrapping_add(service_id::POSITIVE_OFFSET));
    response.extend_from_slice(data);
    response
}

/// Build the wire form of a negative response.
pub fn negative_response(sid: u8, nrc: NegativeResponseCode) -> Vec<u8> {
    vec![service_id::NEGATIVE_RESPONSE, sid, nrc.into()]
}

/// A fully reassembled diagnostic request: service ID plus parameter
/// bytes. Never partially valid; an empty payload does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdsRequest {
    pub sid: u8,
    pub data: Vec<u8>,
}

impl UdsRequest {
    /// Parse a reassembled ISO-TP payload. `None` for an empty payload.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let (&sid, data) = payload.split_first()?;
        Some(Self {
            sid,
            data: data.to_vec(),
        })
    }

    /// Total request length on the wire, including the service ID byte.
    pub fn wire_len(&self) -> usize {
        1 + self.data.len()
    }
}

/// The dispatcher's verdict on one request. Exactly one response exists
/// per request; serialization order is fixed by ISO 14229.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdsResponse {
    Positive { sid: u8, data: Vec<u8> },
    Negative { sid: u8, nrc: NegativeResponseCode },
}

impl UdsResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Positive { sid, data } => positive_response(*sid, data),
            Self::Negative { sid, nrc } => negative_response(*sid, *nrc),
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive { .. })
    }
}
