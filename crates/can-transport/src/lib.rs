//! can-transport: blocking CAN bus abstractions
//!
//! This crate provides traits and types for interacting with Controller Area Network (CAN)
//! interfaces, with feature-gated backends. The default build enables a scripted `mock`
//! backend so that binaries and tests run on any host without native drivers.
//! [`SharedBus`] lets several device drivers take turns on one interface.

mod types;
pub use types::{BusInfo, CanFrame, CanId, Timestamp, MAX_PAYLOAD};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::CanBus;

mod shared;
pub use shared::SharedBus;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockBus;

#[cfg(feature = "slcan")]
mod slcan;

#[cfg(feature = "slcan")]
pub use slcan::{SlcanBitrate, SlcanBus};

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socket_can;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub use socket_can::SocketCanBus;
