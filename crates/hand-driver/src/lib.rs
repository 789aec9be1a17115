//! hand-driver: multi-joint hands on a shared CAN bus
//!
//! [`HandDriver::connect`] binds one hand, by id or by scanning the bus for
//! the requested side, and exposes torque control, joint positions and
//! readings, and named grasps. Joint targets are checked against per-joint
//! bounds before they reach the wire. Hand settings load from YAML.

mod error;
pub use error::{DriverError, Result};

mod types;
pub use types::{ConnectionState, HandStatus, JointConfig, JointInfo, LimitPolicy};

pub mod grasps;
pub use grasps::{default_joints, GraspDefinition, GraspTable, DEFAULT_JOINT_COUNT};

mod config;
pub use config::{load_hand_config, load_hand_configs_dir, GraspDegrees, HandConfig};

mod registry;
pub use registry::HandRegistry;

pub mod discovery;
pub use discovery::{discover, probe_order};

mod driver;
pub use driver::{
    HandDriver, POSITION_SCALE, START_TIME_SCALE, TEMPERATURE_SCALE, TORQUE_LIMIT_SCALE,
    TORQUE_SCALE,
};

mod follow;
pub use follow::{FollowLoop, FollowReport, JointTargetSource, JsonlTargets};

mod metrics;
pub use metrics::DriverMetrics;

pub use hand_protocol::Side;
