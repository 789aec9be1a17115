use crate::types::ConnectionState;
use can_transport::TransportError;
use hand_protocol::ChannelError;
use thiserror::Error;

pub type Result<T, E = DriverError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DriverError {
    /// Channel failures pass through unchanged.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("{message}")]
    DeviceNotFound {
        message: String,
        wrong_side_found: bool,
    },
    #[error("{what} out of range: {detail}")]
    OutOfRange { what: &'static str, detail: String },
    #[error("joint {joint} target {value:.4} rad outside [{min:.4}, {max:.4}]")]
    JointLimit {
        joint: u8,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("unknown grasp {0:?}")]
    UnknownGrasp(String),
    #[error("device id {0} is already claimed on this bus")]
    DeviceIdInUse(u8),
    #[error("operation not allowed while {0}")]
    InvalidState(ConnectionState),
    #[error("bus handle poisoned by a panicked user")]
    BusPoisoned,
}

impl DriverError {
    pub(crate) fn out_of_range(what: &'static str, detail: impl Into<String>) -> Self {
        DriverError::OutOfRange {
            what,
            detail: detail.into(),
        }
    }

    pub(crate) fn config(detail: impl Into<String>) -> Self {
        DriverError::Channel(ChannelError::Config(detail.into()))
    }

    /// A dropped cycle rather than a failed device.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DriverError::Channel(e) if e.is_recoverable())
    }

    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::Channel(e) => match e {
                ChannelError::Config(_) => "config",
                ChannelError::Timeout { .. } => "timeout",
                ChannelError::ExhaustedRetries { .. } => "exhausted_retries",
                ChannelError::Status { .. } => "status",
                ChannelError::Framing(_) => "framing",
                ChannelError::InvalidValue(_) => "invalid_value",
                ChannelError::Transport(_) => "transport",
            },
            DriverError::DeviceNotFound { .. } => "device_not_found",
            DriverError::OutOfRange { .. } => "out_of_range",
            DriverError::JointLimit { .. } => "joint_limit",
            DriverError::UnknownGrasp(_) => "unknown_grasp",
            DriverError::DeviceIdInUse(_) => "device_id_in_use",
            DriverError::InvalidState(_) => "invalid_state",
            DriverError::BusPoisoned => "bus_poisoned",
        }
    }
}

impl From<TransportError> for DriverError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Poisoned => DriverError::BusPoisoned,
            other => DriverError::Channel(ChannelError::Transport(other)),
        }
    }
}
