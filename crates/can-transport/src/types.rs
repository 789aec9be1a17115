use core::fmt;
use time::OffsetDateTime;

/// Largest payload a classic CAN data frame can carry.
pub const MAX_PAYLOAD: usize = 8;

/// 11-bit or 29-bit CAN identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CanId {
    raw: u32,
    extended: bool,
}

impl CanId {
    pub fn standard(id11: u16) -> Option<Self> {
        if id11 <= 0x7FF {
            Some(Self {
                raw: u32::from(id11),
                extended: false,
            })
        } else {
            None
        }
    }

    pub fn extended(id29: u32) -> Option<Self> {
        if id29 <= 0x1FFF_FFFF {
            Some(Self {
                raw: id29,
                extended: true,
            })
        } else {
            None
        }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "0x{raw:08X}", raw = self.raw)
        } else {
            write!(f, "0x{raw:03X}", raw = self.raw)
        }
    }
}

/// A classic CAN data frame (no CAN FD)
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CanFrame {
    pub id: CanId,
    pub len: u8,
    pub data: [u8; MAX_PAYLOAD],
    pub rtr: bool,
    pub timestamp: Option<Timestamp>,
}

impl CanFrame {
    /// Build a data frame; `None` if the payload exceeds eight bytes.
    pub fn new(id: CanId, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_PAYLOAD {
            return None;
        }
        let mut data = [0u8; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            len: payload.len() as u8,
            data,
            rtr: false,
            timestamp: None,
        })
    }

    /// The valid bytes of the frame, `len` clamped to the buffer size.
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.len).min(MAX_PAYLOAD);
        &self.data[..len]
    }

    pub fn stamped_now(mut self) -> Self {
        self.timestamp = Some(Timestamp(OffsetDateTime::now_utc()));
        self
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.len)?;
        for b in self.payload() {
            write!(f, " {b:02X}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

#[derive(Clone, Debug)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_ranges() {
        assert!(CanId::standard(0x7FF).is_some());
        assert!(CanId::standard(0x800).is_none());
        assert!(CanId::extended(0x1FFF_FFFF).is_some());
        assert!(CanId::extended(0x2000_0000).is_none());
    }

    #[test]
    fn test_frame_payload_limits() {
        let id = CanId::extended(0x0C41_AA32).unwrap();
        assert!(CanFrame::new(id, &[0; 9]).is_none());
        let frame = CanFrame::new(id, &[1, 2, 3]).unwrap();
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.to_string(), "0x0C41AA32 [3] 01 02 03");
    }

    #[test]
    fn test_empty_payload() {
        let id = CanId::standard(0x123).unwrap();
        let frame = CanFrame::new(id, &[]).unwrap();
        assert!(frame.payload().is_empty());
        assert_eq!(frame.to_string(), "0x123 [0]");
    }
}
