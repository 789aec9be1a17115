//! Arbitration-id framing and numeric encoding.
//!
//! The 29-bit identifier is an addressed, typed envelope. Little byte order,
//! low to high:
//!
//! | byte | bits                                              |
//! |------|---------------------------------------------------|
//! | 0    | source node id                                    |
//! | 1    | target node id                                    |
//! | 2    | `param & 0x1F` \| `(message & 0x07) << 5`         |
//! | 3    | `(message & 0x18) >> 3` \| `priority << 2`        |
//!
//! A reply swaps source and target relative to its request.

use crate::{ChannelError, Result};
use can_transport::CanId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_NODE_ID: u8 = 1;
pub const MAX_NODE_ID: u8 = 253;
pub const MAX_PRIORITY: u8 = 7;

pub const DEFAULT_DEVICE_ID: u8 = 50;
pub const DEFAULT_HOST_ID: u8 = 0xAA;
pub const DEFAULT_PRIORITY: u8 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    ReadParam = 1,
    WriteParam = 2,
    ParamResponse = 3,
    ReadJointParam = 4,
    WriteJointParam = 5,
    JointParamResponse = 6,
    ZeroJoints = 7,
}

impl MessageKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => MessageKind::ReadParam,
            2 => MessageKind::WriteParam,
            3 => MessageKind::ParamResponse,
            4 => MessageKind::ReadJointParam,
            5 => MessageKind::WriteJointParam,
            6 => MessageKind::JointParamResponse,
            7 => MessageKind::ZeroJoints,
            _ => return None,
        })
    }

    /// The message kind the device answers a request with.
    pub fn reply(self) -> Option<Self> {
        match self {
            MessageKind::ReadParam | MessageKind::WriteParam => Some(MessageKind::ParamResponse),
            MessageKind::ReadJointParam | MessageKind::WriteJointParam => {
                Some(MessageKind::JointParamResponse)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ParamKind {
    None = 0,
    DeviceId = 1,
    HandSide = 2,
    Version = 3,
    TorqueEnabled = 4,
    TorqueLimit = 5,
    TargetPosition = 6,
    PresentPosition = 7,
    Torque = 8,
    Temperature = 9,
    ProportionalGain = 10,
    StartTime = 11,
}

impl ParamKind {
    pub const ALL: [ParamKind; 12] = [
        ParamKind::None,
        ParamKind::DeviceId,
        ParamKind::HandSide,
        ParamKind::Version,
        ParamKind::TorqueEnabled,
        ParamKind::TorqueLimit,
        ParamKind::TargetPosition,
        ParamKind::PresentPosition,
        ParamKind::Torque,
        ParamKind::Temperature,
        ParamKind::ProportionalGain,
        ParamKind::StartTime,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Declared width of the value in a read reply.
    ///
    /// Writes always carry two bytes regardless of this width.
    pub fn wire_width(self) -> usize {
        match self {
            ParamKind::DeviceId | ParamKind::TorqueEnabled | ParamKind::Temperature => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which hand a device reports itself as (bit 0 of the HandSide parameter).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn from_wire(value: i16) -> Self {
        if value & 1 == 1 {
            Side::Right
        } else {
            Side::Left
        }
    }

    pub fn to_wire(self) -> i16 {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

impl std::str::FromStr for Side {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(ChannelError::InvalidValue(format!(
                "side must be \"left\" or \"right\", got {other:?}"
            ))),
        }
    }
}

pub fn validate_node_id(id: u8, what: &str) -> Result<u8> {
    if (MIN_NODE_ID..=MAX_NODE_ID).contains(&id) {
        Ok(id)
    } else {
        Err(ChannelError::Config(format!(
            "{what} must be between {MIN_NODE_ID} and {MAX_NODE_ID}, got {id}"
        )))
    }
}

/// Device and host node ids, both validated to `[1, 253]`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct DeviceAddress {
    device_id: u8,
    host_id: u8,
}

impl DeviceAddress {
    pub fn new(device_id: u8, host_id: u8) -> Result<Self> {
        Ok(Self {
            device_id: validate_node_id(device_id, "device id")?,
            host_id: validate_node_id(host_id, "host id")?,
        })
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn host_id(&self) -> u8 {
        self.host_id
    }

    pub fn with_device_id(self, device_id: u8) -> Result<Self> {
        Self::new(device_id, self.host_id)
    }
}

impl Default for DeviceAddress {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID,
            host_id: DEFAULT_HOST_ID,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Priority(u8);

impl Priority {
    pub fn new(value: u8) -> Result<Self> {
        if value <= MAX_PRIORITY {
            Ok(Self(value))
        } else {
            Err(ChannelError::Config(format!(
                "priority must be between 0 and {MAX_PRIORITY}, got {value}"
            )))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(DEFAULT_PRIORITY)
    }
}

/// Decoded fields of a protocol arbitration id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ArbitrationId {
    pub kind: MessageKind,
    pub param: ParamKind,
    pub target: u8,
    pub source: u8,
    pub priority: Priority,
}

impl ArbitrationId {
    pub fn new(
        kind: MessageKind,
        param: ParamKind,
        target: u8,
        source: u8,
        priority: Priority,
    ) -> Result<Self> {
        Ok(Self {
            kind,
            param,
            target: validate_node_id(target, "target id")?,
            source: validate_node_id(source, "source id")?,
            priority,
        })
    }

    pub fn raw(&self) -> u32 {
        let message = self.kind.code();
        let byte2 = (self.param.code() & 0x1F) | ((message & 0x07) << 5);
        let byte3 = ((message & 0x18) >> 3) | (self.priority.value() << 2);
        u32::from_le_bytes([self.source, self.target, byte2, byte3])
    }

    pub fn can_id(&self) -> Result<CanId> {
        let raw = self.raw();
        CanId::extended(raw)
            .ok_or_else(|| ChannelError::Framing(format!("0x{raw:08X} exceeds 29 bits")))
    }

    pub fn decode(raw: u32) -> Result<Self> {
        if raw > 0x1FFF_FFFF {
            return Err(ChannelError::Framing(format!(
                "0x{raw:08X} is not a 29-bit identifier"
            )));
        }
        let [source, target, byte2, byte3] = raw.to_le_bytes();
        let message = ((byte2 >> 5) & 0x07) | ((byte3 & 0x03) << 3);
        let kind = MessageKind::from_code(message)
            .ok_or_else(|| ChannelError::Framing(format!("unknown message code {message}")))?;
        let param = ParamKind::from_code(byte2 & 0x1F)
            .ok_or_else(|| ChannelError::Framing(format!("unknown param code {}", byte2 & 0x1F)))?;
        let priority = Priority::new((byte3 >> 2) & 0x07)?;
        Self::new(kind, param, target, source, priority)
            .map_err(|e| ChannelError::Framing(e.to_string()))
    }

    /// The id a reply to this request carries when sent by `replier`.
    pub fn reply_from(&self, replier: u8) -> Result<Self> {
        let kind = self.kind.reply().ok_or_else(|| {
            ChannelError::InvalidValue(format!("{:?} has no reply kind", self.kind))
        })?;
        Self::new(kind, self.param, self.source, replier, self.priority)
    }
}

/// Pack the four fields into a raw arbitration id.
pub fn encode(
    kind: MessageKind,
    param: ParamKind,
    target: u8,
    source: u8,
    priority: u8,
) -> Result<u32> {
    Ok(ArbitrationId::new(kind, param, target, source, Priority::new(priority)?)?.raw())
}

pub fn decode_i16(lsb: u8, msb: u8) -> i16 {
    i16::from_le_bytes([lsb, msb])
}

pub fn encode_i16(value: i16) -> [u8; 2] {
    value.to_le_bytes()
}

/// Interpret a reply value: one byte is unsigned, two bytes are two's complement.
pub fn decode_value(bytes: &[u8]) -> Result<i16> {
    match *bytes {
        [b] => Ok(i16::from(b)),
        [lsb, msb] => Ok(decode_i16(lsb, msb)),
        _ => Err(ChannelError::Framing(format!(
            "value must be 1 or 2 bytes, got {}",
            bytes.len()
        ))),
    }
}
