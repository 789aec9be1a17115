use crate::ParamKind;
use can_transport::TransportError;
use thiserror::Error;

pub type Result<T, E = ChannelError> = core::result::Result<T, E>;

/// Everything a parameter exchange with the hand can fail with.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Address, priority or other construction-time bound violated.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A single receive expired without any frame on the bus.
    #[error("no frame received within {timeout_ms} ms while waiting for 0x{expected:08X}")]
    Timeout { expected: u32, timeout_ms: u64 },
    /// Frames kept arriving but none carried the expected id.
    #[error("reply 0x{expected:08X} not among {attempts} received frames")]
    ExhaustedRetries { expected: u32, attempts: u32 },
    /// The device answered with a nonzero status.
    #[error("device reported status 0x{status:04X} on {op} of {param}")]
    Status {
        op: &'static str,
        param: ParamKind,
        status: u16,
    },
    /// Reply payload or identifier does not follow the wire format.
    #[error("malformed frame: {0}")]
    Framing(String),
    /// A value cannot be represented on the wire.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error(transparent)]
    Transport(TransportError),
}

impl ChannelError {
    /// Timeouts and missed replies: a control loop may drop the cycle and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChannelError::Timeout { .. } | ChannelError::ExhaustedRetries { .. }
        )
    }
}

impl From<TransportError> for ChannelError {
    fn from(e: TransportError) -> Self {
        ChannelError::Transport(e)
    }
}
