use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

/// Failures of a CAN backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("CAN interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("CAN I/O failed: {0}")]
    Io(String),
    /// A receive waited its full timeout without a frame.
    #[error("no frame before the receive timeout")]
    Timeout,
    #[error("malformed frame: {0}")]
    InvalidFrame(&'static str),
    /// Another user of a [`crate::SharedBus`] panicked while holding it.
    #[error("shared bus poisoned")]
    Poisoned,
}

impl TransportError {
    /// An empty bus rather than a broken one.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}
