//! Named grasps and the default joint bounds of the ten-joint hand.

use crate::{DriverError, JointConfig, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_JOINT_COUNT: usize = 10;

/// Lower bound of every default joint, degrees.
pub const DEFAULT_MIN_DEG: f32 = -5.0;
pub const DEFAULT_MAX_DEG: f32 = 90.0;
/// Indices of the joints with the enlarged range, and its bound.
pub const WIDE_JOINT_INDICES: [usize; 2] = [6, 7];
pub const WIDE_JOINT_MAX_DEG: f32 = 120.0;

const TIP: [[f32; DEFAULT_JOINT_COUNT]; 2] = [
    [0.0, 40.0, 15.0, 8.0, 25.0, 8.0, 25.0, 97.5, 28.3, 20.0],
    [0.0, 80.4, 15.0, 8.0, 25.0, 8.0, 25.0, 97.5, 40.8, 23.0],
];
const POWER: [[f32; DEFAULT_JOINT_COUNT]; 2] = [
    [0.0, 18.5, 20.4, 4.7, 4.5, 7.2, 13.6, 100.0, -2.7, 23.4],
    [0.0, 76.9, 32.4, 74.1, 18.4, 76.1, 16.3, 100.0, 46.5, 27.5],
];

/// Bounds for `count` joints, ids 1..=count.
pub fn default_joints(count: usize) -> Vec<JointConfig> {
    (0..count)
        .map(|i| {
            let max = if WIDE_JOINT_INDICES.contains(&i) {
                WIDE_JOINT_MAX_DEG
            } else {
                DEFAULT_MAX_DEG
            };
            JointConfig {
                id: (i + 1) as u8,
                min_angle: DEFAULT_MIN_DEG.to_radians(),
                max_angle: max.to_radians(),
            }
        })
        .collect()
}

/// Open and closed poses of one grasp, radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraspDefinition {
    pub start_pose: Vec<f32>,
    pub end_pose: Vec<f32>,
}

impl GraspDefinition {
    pub fn from_degrees(start: &[f32], end: &[f32]) -> Self {
        Self {
            start_pose: start.iter().map(|d| d.to_radians()).collect(),
            end_pose: end.iter().map(|d| d.to_radians()).collect(),
        }
    }

    /// `start * (1 - t) + end * t`, elementwise. `t` is not range-checked here.
    pub fn blend(&self, t: f32) -> Vec<f32> {
        self.start_pose
            .iter()
            .zip(&self.end_pose)
            .map(|(s, e)| s * (1.0 - t) + e * t)
            .collect()
    }

    pub(crate) fn check_len(&self, name: &str, joint_count: usize) -> Result<()> {
        for (which, pose) in [("start_pose", &self.start_pose), ("end_pose", &self.end_pose)] {
            if pose.len() != joint_count {
                return Err(DriverError::config(format!(
                    "grasp {name:?} {which} has {} entries, hand has {joint_count} joints",
                    pose.len()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraspTable {
    grasps: BTreeMap<String, GraspDefinition>,
}

impl GraspTable {
    /// `tip`, `power` and `overhead` for the ten-joint hand.
    pub fn standard() -> Self {
        let mut overhead = POWER;
        for pose in &mut overhead {
            pose[7] = 120.0;
            pose[8] = 6.0;
        }
        let mut table = Self::default();
        for (name, [start, end]) in [("tip", TIP), ("power", POWER), ("overhead", overhead)] {
            table.insert(name, GraspDefinition::from_degrees(&start, &end));
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, grasp: GraspDefinition) {
        self.grasps.insert(name.into(), grasp);
    }

    pub fn get(&self, name: &str) -> Result<&GraspDefinition> {
        self.grasps
            .get(name)
            .ok_or_else(|| DriverError::UnknownGrasp(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.grasps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.grasps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grasps.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &GraspDefinition)> {
        self.grasps.iter()
    }
}
