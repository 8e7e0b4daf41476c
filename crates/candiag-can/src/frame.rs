//! CAN frame model

use thiserror::Error;

/// Maximum payload of a classic CAN frame
pub const CLASSIC_FRAME_DATA: usize = 8;

/// Maximum payload of a CAN FD frame
pub const MAX_FRAME_DATA: usize = 64;

const STANDARD_ID_MAX: u32 = 0x7FF;
const EXTENDED_ID_MAX: u32 = 0x1FFF_FFFF;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("CAN identifier 0x{0:X} out of range")]
    InvalidId(u32),

    #[error("Payload of {got} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLong { got: usize, max: usize },
}

/// Framing flags: identifier width, FD framing, bit-rate switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags {
    /// 29-bit extended identifier
    pub extended: bool,
    /// CAN FD frame (up to 64 data bytes)
    pub fd: bool,
    /// Bit-rate switch (FD only)
    pub brs: bool,
}

/// A single CAN frame. Immutable once built; the router owns received
/// frames until they are handed to an endpoint queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    data: Vec<u8>,
    flags: FrameFlags,
}

impl CanFrame {
    /// Build a classic-CAN frame. The identifier width is inferred:
    /// anything above 0x7FF becomes a 29-bit extended frame.
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let flags = FrameFlags {
            extended: id > STANDARD_ID_MAX,
            ..FrameFlags::default()
        };
        Self::with_flags(id, data, flags)
    }

    /// Build a frame with explicit flags.
    pub fn with_flags(
        id: u32,
        data: impl Into<Vec<u8>>,
        flags: FrameFlags,
    ) -> Result<Self, FrameError> {
        let data = data.into();

        let id_max = if flags.extended || id > STANDARD_ID_MAX {
            EXTENDED_ID_MAX
        } else {
            STANDARD_ID_MAX
        };
        if id > id_max {
            return Err(FrameError::InvalidId(id));
        }

        let max = if flags.fd {
            MAX_FRAME_DATA
        } else {
            CLASSIC_FRAME_DATA
        };
        if data.len() > max {
            return Err(FrameError::PayloadTooLong {
                got: data.len(),
                max,
            });
        }

        let flags = FrameFlags {
            extended: flags.extended || id > STANDARD_ID_MAX,
            ..flags
        };

        Ok(Self { id, data, flags })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn is_extended(&self) -> bool {
        self.flags.extended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn standard_id_frame() {
        let frame = CanFrame::new(0x7E0, vec![0x02, 0x3E, 0x00]).unwrap();
        assert_eq!(frame.id(), 0x7E0);
        assert!(!frame.is_extended());
        assert_eq!(frame.data(), &[0x02, 0x3E, 0x00]);
    }

    #[test]
    fn id_above_11_bits_becomes_extended() {
        let frame = CanFrame::new(0x18DA00F1, vec![]).unwrap();
        assert!(frame.is_extended());
    }

    #[test]
    fn id_above_29_bits_rejected() {
        assert_eq!(
            CanFrame::new(0x2000_0000, vec![]),
            Err(FrameError::InvalidId(0x2000_0000))
        );
    }

    #[test]
    fn classic_payload_capped_at_8() {
        let err = CanFrame::new(0x700, vec![0u8; 9]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLong { got: 9, max: 8 });
    }

    #[test]
    fn fd_payload_up_to_64() {
        let flags = FrameFlags {
            fd: true,
            ..Default::default()
        };
        assert!(CanFrame::with_flags(0x700, vec![0u8; 64], flags).is_ok());
        assert!(CanFrame::with_flags(0x700, vec![0u8; 65], flags).is_err());
    }
}
