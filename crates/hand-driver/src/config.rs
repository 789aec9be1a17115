//! YAML hand configuration.
//!
//! Joint bounds are radians; grasp poses are degrees in the file and are
//! converted on load. Omitted fields take the protocol defaults.

use crate::grasps::{default_joints, GraspDefinition, GraspTable, DEFAULT_JOINT_COUNT};
use crate::{DriverError, JointConfig, LimitPolicy, Result};
use anyhow::Context;
use hand_protocol::{
    ChannelConfig, DeviceAddress, Priority, Side, DEFAULT_HOST_ID, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_PRIORITY, DEFAULT_TIMEOUT, DISCOVERY_TIMEOUT, MAX_JOINTS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One grasp as written in the file, degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraspDegrees {
    pub start_pose: Vec<f32>,
    pub end_pose: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandConfig {
    /// Bind this id directly; `None` scans the bus.
    pub device_id: Option<u8>,
    /// Only accept a hand of this side during discovery.
    pub side: Option<Side>,
    pub host_id: u8,
    pub priority: u8,
    pub joint_count: usize,
    pub timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub max_attempts: u32,
    pub limit_policy: LimitPolicy,
    pub joints: Option<Vec<JointConfig>>,
    pub grasps: Option<BTreeMap<String, GraspDegrees>>,
}

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            side: None,
            host_id: DEFAULT_HOST_ID,
            priority: DEFAULT_PRIORITY,
            joint_count: DEFAULT_JOINT_COUNT,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            discovery_timeout_ms: DISCOVERY_TIMEOUT.as_millis() as u64,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            limit_policy: LimitPolicy::default(),
            joints: None,
            grasps: None,
        }
    }
}

impl HandConfig {
    pub fn for_device(device_id: u8) -> Self {
        Self {
            device_id: Some(device_id),
            ..Self::default()
        }
    }

    pub fn for_side(side: Side) -> Self {
        Self {
            side: Some(side),
            ..Self::default()
        }
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let cfg: HandConfig = serde_yaml::from_str(raw).context("decoding hand config")?;
        cfg.validate().context("validating hand config")?;
        Ok(cfg)
    }

    /// Check every bound that `connect` would otherwise trip over.
    pub fn validate(&self) -> Result<()> {
        self.channel_config()?;
        self.joint_table()?;
        self.grasp_table()?;
        Ok(())
    }

    /// Channel settings for normal operation; the device id is a placeholder
    /// until the hand is bound.
    pub fn channel_config(&self) -> Result<ChannelConfig> {
        let device = self.device_id.unwrap_or(hand_protocol::DEFAULT_DEVICE_ID);
        let address = DeviceAddress::new(device, self.host_id)?;
        let priority = Priority::new(self.priority)?;
        if self.max_attempts == 0 {
            return Err(DriverError::config("max_attempts must be at least 1"));
        }
        if self.timeout_ms == 0 || self.discovery_timeout_ms == 0 {
            return Err(DriverError::config("timeouts must be nonzero"));
        }
        Ok(ChannelConfig::new(address)
            .with_priority(priority)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_attempts(self.max_attempts))
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn joint_table(&self) -> Result<Vec<JointConfig>> {
        if self.joint_count == 0 || self.joint_count > MAX_JOINTS {
            return Err(DriverError::config(format!(
                "joint_count {} outside 1..={MAX_JOINTS}",
                self.joint_count
            )));
        }
        let Some(joints) = &self.joints else {
            return Ok(default_joints(self.joint_count));
        };
        if joints.len() != self.joint_count {
            return Err(DriverError::config(format!(
                "{} joint entries for joint_count {}",
                joints.len(),
                self.joint_count
            )));
        }
        for (i, j) in joints.iter().enumerate() {
            if usize::from(j.id) != i + 1 {
                return Err(DriverError::config(format!(
                    "joint entry {i} has id {}, expected {}",
                    j.id,
                    i + 1
                )));
            }
            if !(j.min_angle <= j.max_angle) {
                return Err(DriverError::config(format!(
                    "joint {}: min_angle {} above max_angle {}",
                    j.id, j.min_angle, j.max_angle
                )));
            }
        }
        Ok(joints.clone())
    }

    /// Configured grasps, or the standard set for a ten-joint hand.
    pub fn grasp_table(&self) -> Result<GraspTable> {
        let Some(grasps) = &self.grasps else {
            if self.joint_count == DEFAULT_JOINT_COUNT {
                return Ok(GraspTable::standard());
            }
            return Ok(GraspTable::default());
        };
        let mut table = GraspTable::default();
        for (name, g) in grasps {
            let def = GraspDefinition::from_degrees(&g.start_pose, &g.end_pose);
            def.check_len(name, self.joint_count)?;
            table.insert(name.clone(), def);
        }
        Ok(table)
    }
}

pub fn load_hand_config(path: impl AsRef<Path>) -> anyhow::Result<HandConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading hand config: {}", path.display()))?;
    HandConfig::from_yaml_str(&raw).with_context(|| format!("loading {}", path.display()))
}

/// Every `*.yml`/`*.yaml` file in `dir`, sorted by path.
pub fn load_hand_configs_dir(dir: impl AsRef<Path>) -> anyhow::Result<Vec<(PathBuf, HandConfig)>> {
    let dir = dir.as_ref();
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("listing hand configs: {}", dir.display()))?
    {
        let path = entry?.path();
        if let Some(ext) = path.extension() {
            if ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    entries
        .into_iter()
        .map(|p| {
            let cfg = load_hand_config(&p)?;
            Ok((p, cfg))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_defaults() {
        let cfg = HandConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg, HandConfig::default());
        let chan = cfg.channel_config().unwrap();
        assert_eq!(chan.address.device_id(), 50);
        assert_eq!(chan.address.host_id(), 0xAA);
        assert_eq!(chan.timeout, Duration::from_millis(500));
        assert_eq!(cfg.discovery_timeout(), Duration::from_millis(100));
        assert_eq!(cfg.grasp_table().unwrap().len(), 3);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
device_id: 51
side: right
priority: 5
limit_policy: reject
grasps:
  wave:
    start_pose: [0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
    end_pose: [0, 90, 0, 0, 0, 0, 0, 0, 0, 0]
"#;
        let cfg = HandConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.device_id, Some(51));
        assert_eq!(cfg.side, Some(Side::Right));
        assert_eq!(cfg.limit_policy, LimitPolicy::Reject);
        let table = cfg.grasp_table().unwrap();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["wave"]);
        let wave = table.get("wave").unwrap();
        assert!((wave.end_pose[1] - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_bad_values() {
        for yaml in [
            "device_id: 0",
            "device_id: 254",
            "host_id: 255",
            "priority: 8",
            "joint_count: 0",
            "joint_count: 17",
            "max_attempts: 0",
            "joints: [{id: 1, min_angle: 0.0, max_angle: 1.0}]",
            "grasps: {bad: {start_pose: [0], end_pose: [0]}}",
            "unknown_key: 1",
        ] {
            assert!(HandConfig::from_yaml_str(yaml).is_err(), "{yaml}");
        }
    }

    #[test]
    fn test_inverted_joint_bounds() {
        let cfg = HandConfig {
            joint_count: 1,
            joints: Some(vec![JointConfig {
                id: 1,
                min_angle: 1.0,
                max_angle: 0.0,
            }]),
            ..HandConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_dir_sorted() {
        let dir = std::env::temp_dir().join(format!("hand-configs-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.yaml"), "device_id: 51\n").unwrap();
        fs::write(dir.join("a.yml"), "device_id: 50\n").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        let loaded = load_hand_configs_dir(&dir).unwrap();
        let ids: Vec<_> = loaded.iter().map(|(_, c)| c.device_id).collect();
        assert_eq!(ids, vec![Some(50), Some(51)]);
        fs::remove_dir_all(&dir).unwrap();
    }
}
