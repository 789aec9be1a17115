use crate::config::HandConfig;
use crate::discovery::discover;
use crate::grasps::GraspTable;
use crate::metrics::DriverMetrics;
use crate::{
    ConnectionState, DriverError, HandRegistry, HandStatus, JointConfig, JointInfo, LimitPolicy,
    Result,
};
use can_transport::{CanBus, SharedBus};
use hand_protocol::{
    validate_node_id, ChannelConfig, JointParamChannel, ParamChannel, ParamKind, Side,
};
use tracing::{debug, info, warn};

/// Device units per radian of joint position.
pub const POSITION_SCALE: f32 = 1000.0;
/// Device units per unit of torque limit.
pub const TORQUE_LIMIT_SCALE: f32 = 1000.0;
pub const TORQUE_SCALE: f32 = 100.0;
pub const TEMPERATURE_SCALE: f32 = 10.0;
pub const START_TIME_SCALE: f32 = 10.0;

/// One hand on a shared bus.
///
/// Every operation holds the bus for all of its exchanges, so drivers for
/// different hands may share one [`SharedBus`] across threads. Operations on
/// one driver take `&mut self` and cannot overlap.
pub struct HandDriver<B: CanBus> {
    bus: SharedBus<B>,
    channel: ChannelConfig,
    joints: Vec<JointConfig>,
    grasps: GraspTable,
    policy: LimitPolicy,
    state: ConnectionState,
    registry: HandRegistry,
    metrics: Option<DriverMetrics>,
}

impl<B: CanBus> HandDriver<B> {
    /// Bind a hand: the configured id if there is one, otherwise the first
    /// unclaimed hand of the configured side found by scanning the bus.
    pub fn connect(bus: SharedBus<B>, config: &HandConfig, registry: &HandRegistry) -> Result<Self> {
        let channel = config.channel_config()?;
        let joints = config.joint_table()?;
        let grasps = config.grasp_table()?;

        let mut state = ConnectionState::Disconnected;
        let device_id = match config.device_id {
            Some(id) => id,
            None => {
                state = ConnectionState::Discovering;
                debug!(%state, side = ?config.side, "scanning for hand");
                let probe = channel.with_timeout(config.discovery_timeout());
                let mut guard = bus.lock()?;
                discover(&mut *guard, probe, config.side, registry)?
            }
        };
        registry.claim(device_id)?;
        let channel = match channel.for_device(device_id) {
            Ok(c) => c,
            Err(e) => {
                registry.release(device_id);
                return Err(e.into());
            }
        };
        info!(device_id, from = %state, joints = joints.len(), "hand bound");

        Ok(Self {
            bus,
            channel,
            joints,
            grasps,
            policy: config.limit_policy,
            state: ConnectionState::Bound,
            registry: registry.clone(),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: DriverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Release the device id. Later operations fail with `InvalidState`.
    pub fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.registry.release(self.channel.address.device_id());
            info!(device_id = self.device_id(), "hand disconnected");
            self.state = ConnectionState::Disconnected;
        }
    }

    pub fn device_id(&self) -> u8 {
        self.channel.address.device_id()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn joints(&self) -> &[JointConfig] {
        &self.joints
    }

    pub fn grasps(&self) -> &GraspTable {
        &self.grasps
    }

    pub fn limit_policy(&self) -> LimitPolicy {
        self.policy
    }

    pub(crate) fn metrics(&self) -> Option<&DriverMetrics> {
        self.metrics.as_ref()
    }

    // Runs `f` with the bus held for its whole duration.
    fn with_bus<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut B, ChannelConfig) -> Result<T>,
    ) -> Result<T> {
        if !self.state.is_connected() {
            return self.checked(op, Err(DriverError::InvalidState(self.state)));
        }
        let result = match self.bus.lock() {
            Ok(mut guard) => f(&mut *guard, self.channel),
            Err(e) => Err(e.into()),
        };
        if let Some(m) = &self.metrics {
            m.observe(op, &result);
        }
        result
    }

    // Records a failure that happens before the bus is touched.
    fn checked<T>(&self, op: &'static str, result: Result<T>) -> Result<T> {
        if let (Some(m), Err(_)) = (&self.metrics, &result) {
            m.observe(op, &result);
        }
        result
    }

    fn read_param(&self, op: &'static str, param: ParamKind) -> Result<i16> {
        self.with_bus(op, |bus, cfg| Ok(ParamChannel::new(bus, cfg).read(param)?))
    }

    fn write_param(&self, op: &'static str, param: ParamKind, value: i16) -> Result<()> {
        self.with_bus(op, |bus, cfg| Ok(ParamChannel::new(bus, cfg).write(param, value)?))
    }

    fn read_scaled(&self, op: &'static str, param: ParamKind, scale: f32) -> Result<Vec<f32>> {
        let count = self.joint_count();
        let raw = self.with_bus(op, |bus, cfg| {
            Ok(JointParamChannel::new(bus, cfg).read_joints(param, count)?)
        })?;
        Ok(raw.into_iter().map(|v| f32::from(v) / scale).collect())
    }

    pub fn enable(&mut self) -> Result<()> {
        self.write_param("enable", ParamKind::TorqueEnabled, 1)?;
        self.state = ConnectionState::Enabled;
        info!(device_id = self.device_id(), "torque enabled");
        Ok(())
    }

    pub fn disable(&mut self) -> Result<()> {
        self.write_param("disable", ParamKind::TorqueEnabled, 0)?;
        self.state = ConnectionState::Disabled;
        info!(device_id = self.device_id(), "torque disabled");
        Ok(())
    }

    pub fn is_enabled(&mut self) -> Result<bool> {
        Ok(self.read_param("is_enabled", ParamKind::TorqueEnabled)? != 0)
    }

    pub fn side(&mut self) -> Result<Side> {
        Ok(Side::from_wire(self.read_param("side", ParamKind::HandSide)?))
    }

    pub fn set_side(&mut self, side: Side) -> Result<()> {
        self.write_param("set_side", ParamKind::HandSide, side.to_wire())?;
        info!(device_id = self.device_id(), %side, "hand side written");
        Ok(())
    }

    pub fn version(&mut self) -> Result<i16> {
        self.read_param("version", ParamKind::Version)
    }

    /// Seconds since the device started.
    pub fn start_time(&mut self) -> Result<f32> {
        Ok(f32::from(self.read_param("start_time", ParamKind::StartTime)?) / START_TIME_SCALE)
    }

    /// Move the device to `new_id`. The acknowledgement comes from the new id.
    pub fn set_device_id(&mut self, new_id: u8) -> Result<()> {
        let op = "set_device_id";
        let new_id = self.checked(op, validate_node_id(new_id, "device id").map_err(Into::into))?;
        let old_id = self.device_id();
        if new_id == old_id {
            return Ok(());
        }
        let next = self.checked(op, self.channel.for_device(new_id).map_err(Into::into))?;
        self.checked(op, self.registry.claim(new_id))?;
        let written = self.with_bus(op, |bus, cfg| {
            Ok(ParamChannel::new(bus, cfg).write_expecting_reply_from(
                ParamKind::DeviceId,
                i16::from(new_id),
                new_id,
            )?)
        });
        if let Err(e) = written {
            self.registry.release(new_id);
            return Err(e);
        }
        self.channel = next;
        self.registry.release(old_id);
        info!(old_id, new_id, "device id changed");
        Ok(())
    }

    /// Present joint positions, radians.
    pub fn positions(&mut self) -> Result<Vec<f32>> {
        self.read_scaled("positions", ParamKind::PresentPosition, POSITION_SCALE)
    }

    /// Command every joint, radians. Targets go through the limit policy first.
    pub fn set_positions(&mut self, positions: &[f32]) -> Result<()> {
        let op = "set_positions";
        if positions.len() != self.joint_count() {
            return self.checked(
                op,
                Err(DriverError::out_of_range(
                    "position vector",
                    format!("{} values for {} joints", positions.len(), self.joint_count()),
                )),
            );
        }
        let raw = positions
            .iter()
            .zip(&self.joints)
            .map(|(&p, joint)| to_device(self.limit(joint, p)?, POSITION_SCALE, "position"))
            .collect::<Result<Vec<i16>>>();
        let raw = self.checked(op, raw)?;
        self.with_bus(op, |bus, cfg| {
            Ok(JointParamChannel::new(bus, cfg).write_joints(ParamKind::TargetPosition, &raw, 0)?)
        })
    }

    /// Command one joint by its 1-based id.
    pub fn set_single_position(&mut self, joint_id: u8, position: f32) -> Result<()> {
        let op = "set_single_position";
        let raw = self.joint(joint_id).and_then(|joint| {
            to_device(self.limit(joint, position)?, POSITION_SCALE, "position")
        });
        let raw = self.checked(op, raw)?;
        self.with_bus(op, |bus, cfg| {
            Ok(JointParamChannel::new(bus, cfg).write_joints(
                ParamKind::TargetPosition,
                &[raw],
                usize::from(joint_id) - 1,
            )?)
        })
    }

    pub fn set_joint_gain(&mut self, joint_id: u8, gain: i16) -> Result<()> {
        let op = "set_joint_gain";
        self.checked(op, self.joint(joint_id).map(|_| ()))?;
        self.with_bus(op, |bus, cfg| {
            Ok(JointParamChannel::new(bus, cfg).write_joints(
                ParamKind::ProportionalGain,
                &[gain],
                usize::from(joint_id) - 1,
            )?)
        })
    }

    /// Fraction of full motor power, read from the first joint.
    pub fn torque_limit(&mut self) -> Result<f32> {
        let raw = self.with_bus("torque_limit", |bus, cfg| {
            Ok(JointParamChannel::new(bus, cfg).read_joints(ParamKind::TorqueLimit, 1)?)
        })?;
        let first = raw
            .first()
            .copied()
            .ok_or_else(|| hand_protocol::ChannelError::Framing("empty torque limit".into()))?;
        Ok(f32::from(first) / TORQUE_LIMIT_SCALE)
    }

    /// Apply the same limit, in `[0, 1]`, to every joint.
    pub fn set_torque_limit(&mut self, limit: f32) -> Result<()> {
        let op = "set_torque_limit";
        if !(0.0..=1.0).contains(&limit) {
            return self.checked(
                op,
                Err(DriverError::out_of_range(
                    "torque limit",
                    format!("{limit} not in [0, 1]"),
                )),
            );
        }
        let raw = self.checked(op, to_device(limit, TORQUE_LIMIT_SCALE, "torque limit"))?;
        let raw = vec![raw; self.joint_count()];
        self.with_bus(op, |bus, cfg| {
            Ok(JointParamChannel::new(bus, cfg).write_joints(ParamKind::TorqueLimit, &raw, 0)?)
        })
    }

    pub fn torques(&mut self) -> Result<Vec<f32>> {
        self.read_scaled("torques", ParamKind::Torque, TORQUE_SCALE)
    }

    /// Joint temperatures, degrees Celsius.
    pub fn temperatures(&mut self) -> Result<Vec<f32>> {
        self.read_scaled("temperatures", ParamKind::Temperature, TEMPERATURE_SCALE)
    }

    /// Blend the named grasp from open (`t = 0`) to closed (`t = 1`).
    pub fn set_grasp(&mut self, name: &str, t: f32) -> Result<()> {
        let op = "set_grasp";
        if !(0.0..=1.0).contains(&t) {
            return self.checked(
                op,
                Err(DriverError::out_of_range(
                    "grasp position",
                    format!("{t} not in [0, 1]"),
                )),
            );
        }
        let pose = self.checked(op, self.grasps.get(name).map(|g| g.blend(t)))?;
        debug!(grasp = name, t, "commanding grasp");
        self.set_positions(&pose)
    }

    pub fn joint_info(&mut self) -> Result<Vec<JointInfo>> {
        let positions = self.positions()?;
        let torques = self.torques()?;
        let temperatures = self.temperatures()?;
        Ok(self
            .joints
            .iter()
            .zip(positions)
            .zip(torques)
            .zip(temperatures)
            .map(|(((joint, position), torque), temperature)| JointInfo {
                id: joint.id,
                position,
                torque,
                temperature,
            })
            .collect())
    }

    /// Snapshot for status consumers; a hand that stops answering is reported
    /// as disconnected rather than as an error.
    pub fn status(&mut self) -> Result<HandStatus> {
        let device_id = self.device_id();
        let snapshot = self
            .is_enabled()
            .and_then(|enabled| Ok((enabled, self.positions()?)));
        match snapshot {
            Ok((enabled, positions)) => Ok(HandStatus {
                device_id,
                connected: true,
                enabled,
                positions,
            }),
            Err(e) if e.is_recoverable() => {
                warn!(device_id, error = %e, "hand not answering");
                Ok(HandStatus {
                    device_id,
                    connected: false,
                    enabled: false,
                    positions: Vec::new(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn joint(&self, joint_id: u8) -> Result<&JointConfig> {
        usize::from(joint_id)
            .checked_sub(1)
            .and_then(|i| self.joints.get(i))
            .ok_or_else(|| {
                DriverError::out_of_range(
                    "joint id",
                    format!("{joint_id} not in 1..={}", self.joints.len()),
                )
            })
    }

    fn limit(&self, joint: &JointConfig, position: f32) -> Result<f32> {
        if position.is_nan() {
            return Err(DriverError::out_of_range(
                "position",
                format!("joint {} target is NaN", joint.id),
            ));
        }
        if joint.contains(position) {
            return Ok(position);
        }
        match self.policy {
            LimitPolicy::Reject => Err(DriverError::JointLimit {
                joint: joint.id,
                value: position,
                min: joint.min_angle,
                max: joint.max_angle,
            }),
            LimitPolicy::Clamp => {
                let clamped = position.clamp(joint.min_angle, joint.max_angle);
                warn!(joint = joint.id, requested = position, clamped, "joint target clamped");
                if let Some(m) = &self.metrics {
                    m.clamped_targets.inc();
                }
                Ok(clamped)
            }
        }
    }
}

impl<B: CanBus> Drop for HandDriver<B> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Scale and round to the nearest device unit.
fn to_device(value: f32, scale: f32, what: &'static str) -> Result<i16> {
    let scaled = (value * scale).round();
    if !scaled.is_finite() || scaled < f32::from(i16::MIN) || scaled > f32::from(i16::MAX) {
        return Err(DriverError::out_of_range(
            what,
            format!("{value} does not fit the 16-bit wire value"),
        ));
    }
    Ok(scaled as i16)
}
