use serde::{Deserialize, Serialize};
use std::fmt;

/// Angular bounds of one joint, radians. `id` is the 1-based wire motor id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointConfig {
    pub id: u8,
    pub min_angle: f32,
    pub max_angle: f32,
}

impl JointConfig {
    pub fn contains(&self, angle: f32) -> bool {
        angle >= self.min_angle && angle <= self.max_angle
    }
}

/// What happens to a target position outside its joint's bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    #[default]
    Clamp,
    Reject,
}

/// Per-joint reading, as served to status consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointInfo {
    pub id: u8,
    pub position: f32,
    pub torque: f32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandStatus {
    pub device_id: u8,
    pub connected: bool,
    pub enabled: bool,
    #[serde(default)]
    pub positions: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Discovering,
    Bound,
    Enabled,
    Disabled,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Bound | ConnectionState::Enabled | ConnectionState::Disabled
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Bound => "bound",
            ConnectionState::Enabled => "enabled",
            ConnectionState::Disabled => "disabled",
        };
        f.write_str(s)
    }
}
