//! hand-protocol: wire format and parameter channels for multi-joint hands
//!
//! Every exchange is a single request frame from the host followed by one
//! reply from the device, matched on the 29-bit arbitration id built by
//! [`ArbitrationId`]. [`ParamChannel`] moves scalar parameters and
//! [`JointParamChannel`] moves per-joint vectors in three-joint chunks.
//! The `sim` feature adds an in-process simulated hand for tests and demos.

pub mod codec;
pub use codec::{
    decode_i16, decode_value, encode, encode_i16, validate_node_id, ArbitrationId, DeviceAddress,
    MessageKind, ParamKind, Priority, Side, DEFAULT_DEVICE_ID, DEFAULT_HOST_ID, DEFAULT_PRIORITY,
    MAX_NODE_ID, MAX_PRIORITY, MIN_NODE_ID,
};

mod error;
pub use error::{ChannelError, Result};

mod config;
pub use config::{ChannelConfig, DEFAULT_TIMEOUT, DISCOVERY_TIMEOUT};

mod matcher;
pub use matcher::{ResponseMatcher, DEFAULT_MAX_ATTEMPTS};

mod param;
pub use param::ParamChannel;

mod joint;
pub use joint::{joint_mask, JointParamChannel, JOINTS_PER_FRAME, MAX_JOINTS};

#[cfg(feature = "sim")]
pub mod sim;
