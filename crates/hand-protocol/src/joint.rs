//! Bitmask-addressed transfer of per-joint vectors.
//!
//! A frame carries a 2-byte joint mask plus up to three 16-bit values, which
//! fills the 8-byte payload. Mask bit *j* selects absolute joint index *j*
//! (wire motor id *j + 1*); values follow in ascending index order.

use crate::codec::{decode_i16, encode_i16, MessageKind, ParamKind};
use crate::{ChannelConfig, ChannelError, Result};
use can_transport::{CanBus, CanFrame};
use std::ops::Range;
use tracing::debug;

pub const JOINTS_PER_FRAME: usize = 3;
/// Joints addressable by the 16-bit mask.
pub const MAX_JOINTS: usize = 16;

/// Mask with one bit per absolute joint index in `joints`.
pub fn joint_mask(joints: Range<usize>) -> Result<u16> {
    if joints.end > MAX_JOINTS {
        return Err(ChannelError::InvalidValue(format!(
            "joint index {} does not fit the {MAX_JOINTS}-bit mask",
            joints.end - 1
        )));
    }
    Ok(joints.fold(0u16, |mask, j| mask | (1 << j)))
}

/// Request/response access to per-joint parameter vectors of one device.
pub struct JointParamChannel<'a, B: CanBus + ?Sized> {
    bus: &'a mut B,
    config: ChannelConfig,
}

impl<'a, B: CanBus + ?Sized> JointParamChannel<'a, B> {
    pub fn new(bus: &'a mut B, config: ChannelConfig) -> Self {
        Self { bus, config }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Read `count` joints starting at index 0, three joints per exchange.
    pub fn read_joints(&mut self, param: ParamKind, count: usize) -> Result<Vec<i16>> {
        let request = self.config.request_id(MessageKind::ReadJointParam, param)?;
        let request_id = request.can_id()?;
        let reply_id = request
            .reply_from(self.config.address.device_id())?
            .can_id()?;
        let matcher = self.config.matcher();

        let mut values = Vec::with_capacity(count);
        for lo in (0..count).step_by(JOINTS_PER_FRAME) {
            let hi = count.min(lo + JOINTS_PER_FRAME);
            let mask = joint_mask(lo..hi)?;
            let frame = CanFrame::new(request_id, &encode_i16(mask as i16))
                .ok_or_else(|| ChannelError::Framing("joint read request".into()))?;
            let resp = matcher.exchange(&mut *self.bus, &frame, reply_id)?;
            let payload = resp.payload();
            let status = status_of(payload, param, "read-joints")?;
            if status != 0 {
                return Err(ChannelError::Status {
                    op: "read-joints",
                    param,
                    status,
                });
            }
            let expected = 2 + 2 * (hi - lo);
            if payload.len() < expected {
                return Err(ChannelError::Framing(format!(
                    "read of {param} joints {lo}..{hi} returned {} bytes, expected {expected}",
                    payload.len()
                )));
            }
            values.extend(
                payload[2..expected]
                    .chunks_exact(2)
                    .map(|pair| decode_i16(pair[0], pair[1])),
            );
            debug!(%param, mask = format_args!("{mask:#06x}"), "read joint chunk");
        }
        Ok(values)
    }

    /// Write consecutive joints starting at index `joint_offset`.
    pub fn write_joints(
        &mut self,
        param: ParamKind,
        values: &[i16],
        joint_offset: usize,
    ) -> Result<()> {
        let request = self.config.request_id(MessageKind::WriteJointParam, param)?;
        let request_id = request.can_id()?;
        let reply_id = request
            .reply_from(self.config.address.device_id())?
            .can_id()?;
        let matcher = self.config.matcher();
        // Every chunk must be addressable before the first one goes out.
        match joint_offset.checked_add(values.len()) {
            Some(end) if end <= MAX_JOINTS => {}
            _ => {
                return Err(ChannelError::InvalidValue(format!(
                    "{} joints at offset {joint_offset} do not fit the {MAX_JOINTS}-bit mask",
                    values.len()
                )))
            }
        }

        for (i, chunk) in values.chunks(JOINTS_PER_FRAME).enumerate() {
            let start = joint_offset + i * JOINTS_PER_FRAME;
            let mask = joint_mask(start..start + chunk.len())?;
            let mut payload = Vec::with_capacity(2 + 2 * chunk.len());
            payload.extend_from_slice(&encode_i16(mask as i16));
            for &v in chunk {
                payload.extend_from_slice(&encode_i16(v));
            }
            let frame = CanFrame::new(request_id, &payload)
                .ok_or_else(|| ChannelError::Framing("joint write request".into()))?;
            let resp = matcher.exchange(&mut *self.bus, &frame, reply_id)?;
            let status = status_of(resp.payload(), param, "write-joints")?;
            if status != 0 {
                return Err(ChannelError::Status {
                    op: "write-joints",
                    param,
                    status,
                });
            }
            debug!(%param, mask = format_args!("{mask:#06x}"), "wrote joint chunk");
        }
        Ok(())
    }
}

fn status_of(payload: &[u8], param: ParamKind, op: &str) -> Result<u16> {
    match payload {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(ChannelError::Framing(format!(
            "{op} of {param}: reply has {} bytes, status needs 2",
            payload.len()
        ))),
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::codec::{ArbitrationId, DeviceAddress, Side};
    use crate::sim::{SimBus, SimulatedHand};
    use can_transport::MockBus;
    use std::time::Duration;

    fn config() -> ChannelConfig {
        ChannelConfig::new(DeviceAddress::new(50, 0xAA).unwrap())
            .with_timeout(Duration::from_millis(5))
    }

    fn sim() -> SimBus {
        SimBus::new().with_device(SimulatedHand::new(50, Side::Left))
    }

    #[test]
    fn test_mask_helper() {
        assert_eq!(joint_mask(0..3).unwrap(), 0b111);
        assert_eq!(joint_mask(9..10).unwrap(), 1 << 9);
        assert_eq!(joint_mask(3..3).unwrap(), 0);
        assert!(joint_mask(15..17).is_err());
    }

    #[test]
    fn test_chunk_count_and_payload_ceiling() {
        for n in 1..=10usize {
            let mut bus = sim();
            let values: Vec<i16> = (0..n as i16).map(|v| v * 100 - 300).collect();
            JointParamChannel::new(&mut bus, config())
                .write_joints(ParamKind::TargetPosition, &values, 0)
                .unwrap();
            assert_eq!(bus.sent().len(), n.div_ceil(JOINTS_PER_FRAME));
            assert!(bus.sent().iter().all(|f| f.payload().len() <= 8));

            let hand = bus.device(50).unwrap();
            assert_eq!(&hand.joint_values(ParamKind::TargetPosition)[..n], &values[..]);
            let seen: u16 = hand.joint_writes().iter().fold(0, |acc, w| acc | w.mask);
            assert_eq!(seen, joint_mask(0..n).unwrap());
        }
    }

    #[test]
    fn test_offset_biases_mask() {
        for k in 0..=6usize {
            let mut bus = sim();
            JointParamChannel::new(&mut bus, config())
                .write_joints(ParamKind::ProportionalGain, &[11, 22, 33, 44], k)
                .unwrap();
            let writes = bus.device(50).unwrap().joint_writes();
            assert_eq!(writes.len(), 2);
            assert_eq!(writes[0].mask, joint_mask(k..k + 3).unwrap());
            assert_eq!(writes[1].mask, joint_mask(k + 3..k + 4).unwrap());
            assert_eq!(writes[1].values, vec![44]);
        }
    }

    #[test]
    fn test_negative_values_on_the_wire() {
        let mut bus = sim();
        JointParamChannel::new(&mut bus, config())
            .write_joints(ParamKind::TargetPosition, &[-1, -1000], 4)
            .unwrap();
        assert_eq!(
            bus.sent()[0].payload(),
            &[0x30, 0x00, 0xFF, 0xFF, 0x18, 0xFC]
        );
    }

    #[test]
    fn test_read_uses_absolute_masks() {
        let mut bus = sim();
        let expected: Vec<i16> = vec![5, -5, 300, 0, 7, 8, -32768, 32767, 1, 2];
        bus.device_mut(50)
            .unwrap()
            .set_joint_values(ParamKind::PresentPosition, expected.clone());
        let got = JointParamChannel::new(&mut bus, config())
            .read_joints(ParamKind::PresentPosition, 10)
            .unwrap();
        assert_eq!(got, expected);

        let masks: Vec<&[u8]> = bus.sent().iter().map(|f| f.payload()).collect();
        assert_eq!(
            masks,
            vec![
                &[0x07, 0x00][..],
                &[0x38, 0x00][..],
                &[0xC0, 0x01][..],
                &[0x00, 0x02][..]
            ]
        );
        let id = ArbitrationId::decode(bus.sent()[0].id.raw()).unwrap();
        assert_eq!(id.kind, MessageKind::ReadJointParam);
    }

    #[test]
    fn test_status_failure_aborts_vector() {
        let mut hand = SimulatedHand::new(50, Side::Left);
        hand.set_fault_status(Some(2));
        let mut bus = SimBus::new().with_device(hand);
        let err = JointParamChannel::new(&mut bus, config())
            .write_joints(ParamKind::TargetPosition, &[1; 10], 0)
            .unwrap_err();
        assert!(matches!(err, ChannelError::Status { status: 2, .. }));
        assert_eq!(bus.sent().len(), 1);
    }

    #[test]
    fn test_short_reply_is_framing_error() {
        let request = config()
            .request_id(MessageKind::ReadJointParam, ParamKind::Torque)
            .unwrap();
        let reply = request.reply_from(50).unwrap();
        let mut bus = MockBus::new("mock0");
        bus.push_rx(CanFrame::new(reply.can_id().unwrap(), &[0, 0, 1, 0]).unwrap());
        let err = JointParamChannel::new(&mut bus, config())
            .read_joints(ParamKind::Torque, 3)
            .unwrap_err();
        assert!(matches!(err, ChannelError::Framing(_)));
    }

    #[test]
    fn test_empty_write_sends_nothing() {
        let mut bus = sim();
        JointParamChannel::new(&mut bus, config())
            .write_joints(ParamKind::TargetPosition, &[], 0)
            .unwrap();
        assert!(bus.sent().is_empty());
    }

    #[test]
    fn test_mask_overflow_rejected_before_send() {
        let mut bus = sim();
        let err = JointParamChannel::new(&mut bus, config())
            .write_joints(ParamKind::TargetPosition, &[1, 2], 15)
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidValue(_)));
        assert!(bus.sent().is_empty());
    }

    #[test]
    fn test_late_chunk_overflow_sends_nothing() {
        let mut bus =
            SimBus::new().with_device(SimulatedHand::with_joint_count(50, Side::Left, 16));
        let err = JointParamChannel::new(&mut bus, config())
            .write_joints(ParamKind::TargetPosition, &[1, 2, 3, 4], 13)
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidValue(_)));
        assert!(bus.sent().is_empty());
        let hand = bus.device(50).unwrap();
        assert_eq!(&hand.joint_values(ParamKind::TargetPosition)[13..16], &[0, 0, 0]);
    }

    #[test]
    fn test_huge_offset_is_an_error() {
        let mut bus = sim();
        let err = JointParamChannel::new(&mut bus, config())
            .write_joints(ParamKind::TargetPosition, &[1, 2], usize::MAX)
            .unwrap_err();
        assert!(matches!(err, ChannelError::InvalidValue(_)));
        assert!(bus.sent().is_empty());
    }
}
