//! In-process simulation of hands on a shared bus.
//!
//! [`SimulatedHand`] answers protocol requests the way the firmware does;
//! [`SimBus`] routes frames between the host and any number of simulated
//! hands and implements [`CanBus`], so channels and drivers run unmodified.

use crate::codec::{
    decode_i16, encode_i16, validate_node_id, ArbitrationId, MessageKind, ParamKind, Side,
};
use crate::joint::{JOINTS_PER_FRAME, MAX_JOINTS};
use can_transport::{BusInfo, CanBus, CanFrame, Result, TransportError};
use std::collections::{BTreeMap, VecDeque};

pub const DEFAULT_JOINT_COUNT: usize = 10;

const STATUS_BAD_PAYLOAD: u8 = 0x01;
const STATUS_BAD_JOINT: u8 = 0x02;
const STATUS_BAD_VALUE: u8 = 0x03;

/// One joint-vector write as the device saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JointWrite {
    pub param: ParamKind,
    pub mask: u16,
    pub values: Vec<i16>,
}

#[derive(Clone, Debug)]
pub struct SimulatedHand {
    device_id: u8,
    joint_count: usize,
    params: BTreeMap<ParamKind, i16>,
    joints: BTreeMap<ParamKind, Vec<i16>>,
    fault_status: Option<u8>,
    silent: bool,
    joint_writes: Vec<JointWrite>,
}

impl SimulatedHand {
    pub fn new(device_id: u8, side: Side) -> Self {
        Self::with_joint_count(device_id, side, DEFAULT_JOINT_COUNT)
    }

    pub fn with_joint_count(device_id: u8, side: Side, joint_count: usize) -> Self {
        let joint_count = joint_count.min(MAX_JOINTS);
        let mut params = BTreeMap::new();
        params.insert(ParamKind::DeviceId, i16::from(device_id));
        params.insert(ParamKind::HandSide, side.to_wire());
        params.insert(ParamKind::Version, 1);
        params.insert(ParamKind::TorqueEnabled, 0);
        params.insert(ParamKind::StartTime, 0);

        let mut joints = BTreeMap::new();
        for (param, init) in [
            (ParamKind::TargetPosition, 0),
            (ParamKind::PresentPosition, 0),
            (ParamKind::TorqueLimit, 1000),
            (ParamKind::Torque, 0),
            (ParamKind::Temperature, 250),
            (ParamKind::ProportionalGain, 100),
        ] {
            joints.insert(param, vec![init; joint_count]);
        }
        Self {
            device_id,
            joint_count,
            params,
            joints,
            fault_status: None,
            silent: false,
            joint_writes: Vec::new(),
        }
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn side(&self) -> Side {
        Side::from_wire(self.param(ParamKind::HandSide))
    }

    pub fn param(&self, param: ParamKind) -> i16 {
        self.params.get(&param).copied().unwrap_or(0)
    }

    pub fn set_param(&mut self, param: ParamKind, value: i16) {
        self.params.insert(param, value);
    }

    pub fn joint_values(&self, param: ParamKind) -> &[i16] {
        self.joints.get(&param).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_joint_values(&mut self, param: ParamKind, mut values: Vec<i16>) {
        values.resize(self.joint_count, 0);
        self.joints.insert(param, values);
    }

    pub fn joint_writes(&self) -> &[JointWrite] {
        &self.joint_writes
    }

    /// Answer every request with this status instead of serving it.
    pub fn set_fault_status(&mut self, status: Option<u8>) {
        self.fault_status = status;
    }

    /// Stop answering entirely.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Serve one frame from the bus; `None` if it is not for this hand.
    pub fn handle(&mut self, frame: &CanFrame) -> Option<CanFrame> {
        if self.silent || !frame.id.is_extended() {
            return None;
        }
        let id = ArbitrationId::decode(frame.id.raw()).ok()?;
        if id.target != self.device_id {
            return None;
        }
        let payload = frame.payload();
        let (replier, body) = match id.kind {
            MessageKind::ReadParam => (self.device_id, self.read_param(id.param)),
            MessageKind::WriteParam => self.write_param(id.param, payload),
            MessageKind::ReadJointParam => (self.device_id, self.read_joints(id.param, payload)),
            MessageKind::WriteJointParam => (self.device_id, self.write_joints(id.param, payload)),
            _ => return None,
        };
        let reply = id.reply_from(replier).ok()?;
        CanFrame::new(reply.can_id().ok()?, &body)
    }

    fn fault(&self, joint_reply: bool) -> Option<Vec<u8>> {
        self.fault_status
            .map(|s| if joint_reply { vec![s, 0] } else { vec![s] })
    }

    fn read_param(&self, param: ParamKind) -> Vec<u8> {
        if let Some(fault) = self.fault(false) {
            return fault;
        }
        let value = self.param(param);
        if param.wire_width() == 1 {
            vec![0, value as u8]
        } else {
            let [lo, hi] = encode_i16(value);
            vec![0, lo, hi]
        }
    }

    fn write_param(&mut self, param: ParamKind, payload: &[u8]) -> (u8, Vec<u8>) {
        if let Some(fault) = self.fault(false) {
            return (self.device_id, fault);
        }
        let value = match payload {
            [lo, hi] => decode_i16(*lo, *hi),
            _ => return (self.device_id, vec![STATUS_BAD_PAYLOAD]),
        };
        match param {
            ParamKind::DeviceId => {
                let new_id = match u8::try_from(value).ok().and_then(|v| validate_node_id(v, "id").ok()) {
                    Some(id) => id,
                    None => return (self.device_id, vec![STATUS_BAD_VALUE]),
                };
                self.device_id = new_id;
                self.params.insert(param, value);
                (new_id, vec![0])
            }
            ParamKind::HandSide => {
                self.params.insert(param, value & 1);
                (self.device_id, vec![0])
            }
            _ => {
                self.params.insert(param, value);
                (self.device_id, vec![0])
            }
        }
    }

    fn selected(&self, mask: u16) -> Option<Vec<usize>> {
        let joints: Vec<usize> = (0..MAX_JOINTS).filter(|j| mask & (1 << j) != 0).collect();
        if joints.is_empty()
            || joints.len() > JOINTS_PER_FRAME
            || joints.iter().any(|&j| j >= self.joint_count)
        {
            return None;
        }
        Some(joints)
    }

    fn read_joints(&self, param: ParamKind, payload: &[u8]) -> Vec<u8> {
        if let Some(fault) = self.fault(true) {
            return fault;
        }
        let mask = match payload {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            _ => return vec![STATUS_BAD_PAYLOAD, 0],
        };
        let (Some(joints), Some(values)) = (self.selected(mask), self.joints.get(&param)) else {
            return vec![STATUS_BAD_JOINT, 0];
        };
        let mut body = vec![0, 0];
        for j in joints {
            body.extend_from_slice(&encode_i16(values[j]));
        }
        body
    }

    fn write_joints(&mut self, param: ParamKind, payload: &[u8]) -> Vec<u8> {
        if let Some(fault) = self.fault(true) {
            return fault;
        }
        let Some((mask_bytes, rest)) = payload.split_first_chunk::<2>() else {
            return vec![STATUS_BAD_PAYLOAD, 0];
        };
        let mask = u16::from_le_bytes(*mask_bytes);
        let Some(joints) = self.selected(mask) else {
            return vec![STATUS_BAD_JOINT, 0];
        };
        if rest.len() != 2 * joints.len() || !self.joints.contains_key(&param) {
            return vec![STATUS_BAD_PAYLOAD, 0];
        }
        let values: Vec<i16> = rest
            .chunks_exact(2)
            .map(|pair| decode_i16(pair[0], pair[1]))
            .collect();
        for (&j, &v) in joints.iter().zip(&values) {
            if let Some(slot) = self.joints.get_mut(&param).and_then(|vs| vs.get_mut(j)) {
                *slot = v;
            }
            // Positions settle instantly.
            if param == ParamKind::TargetPosition {
                if let Some(slot) = self
                    .joints
                    .get_mut(&ParamKind::PresentPosition)
                    .and_then(|vs| vs.get_mut(j))
                {
                    *slot = v;
                }
            }
        }
        self.joint_writes.push(JointWrite {
            param,
            mask,
            values,
        });
        vec![0, 0]
    }
}

/// A bus shared by the host and a set of simulated hands.
#[derive(Debug, Default)]
pub struct SimBus {
    devices: Vec<SimulatedHand>,
    rx: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    recv_calls: usize,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, hand: SimulatedHand) -> Self {
        self.devices.push(hand);
        self
    }

    pub fn device(&self, device_id: u8) -> Option<&SimulatedHand> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn device_mut(&mut self, device_id: u8) -> Option<&mut SimulatedHand> {
        self.devices.iter_mut().find(|d| d.device_id == device_id)
    }

    /// Queue a frame from some other node, received before any reply.
    pub fn inject(&mut self, frame: CanFrame) {
        self.rx.push_back(frame);
    }

    pub fn sent(&self) -> &[CanFrame] {
        &self.sent
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    pub fn recv_calls(&self) -> usize {
        self.recv_calls
    }
}

impl CanBus for SimBus {
    fn open(_name: &str) -> Result<Self> {
        Ok(Self::new().with_device(SimulatedHand::new(
            crate::codec::DEFAULT_DEVICE_ID,
            Side::Left,
        )))
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "sim0".to_string(),
            driver: "simulated-hand".to_string(),
        }])
    }

    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<CanFrame> {
        self.recv_calls += 1;
        self.rx
            .pop_front()
            .map(CanFrame::stamped_now)
            .ok_or(TransportError::Timeout)
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        self.sent.push(frame.clone());
        for hand in &mut self.devices {
            if let Some(reply) = hand.handle(frame) {
                tracing::trace!(device = hand.device_id, %reply, "sim reply");
                self.rx.push_back(reply);
            }
        }
        Ok(())
    }
}
