use crate::codec::{ArbitrationId, DeviceAddress, MessageKind, ParamKind, Priority};
use crate::matcher::{ResponseMatcher, DEFAULT_MAX_ATTEMPTS};
use crate::Result;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_millis(100);

/// Immutable settings shared by the parameter channels of one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub address: DeviceAddress,
    pub priority: Priority,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl ChannelConfig {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            priority: Priority::default(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Same settings addressed to another device id.
    pub fn for_device(self, device_id: u8) -> Result<Self> {
        Ok(Self {
            address: self.address.with_device_id(device_id)?,
            ..self
        })
    }

    /// Host → device request id.
    pub fn request_id(&self, kind: MessageKind, param: ParamKind) -> Result<ArbitrationId> {
        ArbitrationId::new(
            kind,
            param,
            self.address.device_id(),
            self.address.host_id(),
            self.priority,
        )
    }

    pub fn matcher(&self) -> ResponseMatcher {
        ResponseMatcher::new(self.timeout, self.max_attempts)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(DeviceAddress::default())
    }
}
