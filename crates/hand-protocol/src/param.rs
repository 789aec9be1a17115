use crate::codec::{decode_value, encode_i16, MessageKind, ParamKind};
use crate::{ChannelConfig, ChannelError, Result};
use can_transport::{CanBus, CanFrame};
use tracing::debug;

/// Request/response access to the scalar parameters of one device.
pub struct ParamChannel<'a, B: CanBus + ?Sized> {
    bus: &'a mut B,
    config: ChannelConfig,
}

impl<'a, B: CanBus + ?Sized> ParamChannel<'a, B> {
    pub fn new(bus: &'a mut B, config: ChannelConfig) -> Self {
        Self { bus, config }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Read one parameter. One value byte is unsigned, two are two's complement.
    pub fn read(&mut self, param: ParamKind) -> Result<i16> {
        let request = self.config.request_id(MessageKind::ReadParam, param)?;
        let reply = request.reply_from(self.config.address.device_id())?;
        let frame = CanFrame::new(request.can_id()?, &[])
            .ok_or_else(|| ChannelError::Framing("empty request".into()))?;

        let resp = self
            .config
            .matcher()
            .exchange(&mut *self.bus, &frame, reply.can_id()?)?;
        let (&status, value) = resp
            .payload()
            .split_first()
            .ok_or_else(|| ChannelError::Framing(format!("empty reply to read of {param}")))?;
        if status != 0 {
            return Err(ChannelError::Status {
                op: "read",
                param,
                status: u16::from(status),
            });
        }
        if value.is_empty() || value.len() > 2 {
            return Err(ChannelError::Framing(format!(
                "read of {param} returned {} value bytes, expected 1 or 2",
                value.len()
            )));
        }
        let value = decode_value(value)?;
        debug!(device = self.config.address.device_id(), %param, value, "read param");
        Ok(value)
    }

    /// Write one parameter as two little-endian bytes.
    pub fn write(&mut self, param: ParamKind, value: i16) -> Result<()> {
        let replier = self.config.address.device_id();
        self.write_expecting_reply_from(param, value, replier)
    }

    /// Write one parameter and expect the acknowledgement from `reply_device`.
    ///
    /// Used when the write itself moves the device to a new id.
    pub fn write_expecting_reply_from(
        &mut self,
        param: ParamKind,
        value: i16,
        reply_device: u8,
    ) -> Result<()> {
        let request = self.config.request_id(MessageKind::WriteParam, param)?;
        let reply = request.reply_from(reply_device)?;
        let frame = CanFrame::new(request.can_id()?, &encode_i16(value))
            .ok_or_else(|| ChannelError::Framing("write request".into()))?;

        let resp = self
            .config
            .matcher()
            .exchange(&mut *self.bus, &frame, reply.can_id()?)?;
        let status = *resp
            .payload()
            .first()
            .ok_or_else(|| ChannelError::Framing(format!("empty reply to write of {param}")))?;
        if status != 0 {
            return Err(ChannelError::Status {
                op: "write",
                param,
                status: u16::from(status),
            });
        }
        debug!(device = self.config.address.device_id(), %param, value, "wrote param");
        Ok(())
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::codec::{ArbitrationId, DeviceAddress, Side};
    use crate::sim::{SimBus, SimulatedHand};
    use can_transport::MockBus;
    use std::time::Duration;

    fn config(device: u8) -> ChannelConfig {
        ChannelConfig::new(DeviceAddress::new(device, 0xAA).unwrap())
            .with_timeout(Duration::from_millis(5))
    }

    #[test]
    fn test_read_side_and_request_shape() {
        let mut bus = SimBus::new().with_device(SimulatedHand::new(50, Side::Right));
        let side = ParamChannel::new(&mut bus, config(50))
            .read(ParamKind::HandSide)
            .unwrap();
        assert_eq!(Side::from_wire(side), Side::Right);

        let sent = &bus.sent()[0];
        assert!(sent.payload().is_empty());
        let id = ArbitrationId::decode(sent.id.raw()).unwrap();
        assert_eq!(id.kind, MessageKind::ReadParam);
        assert_eq!((id.target, id.source), (50, 0xAA));
    }

    #[test]
    fn test_write_then_read_echoes_two_byte_values() {
        let mut bus = SimBus::new().with_device(SimulatedHand::new(50, Side::Left));
        let mut chan = ParamChannel::new(&mut bus, config(50));
        for v in [i16::MIN, -1000, -1, 0, 1, 1234, i16::MAX] {
            chan.write(ParamKind::Version, v).unwrap();
            assert_eq!(chan.read(ParamKind::Version).unwrap(), v);
        }
    }

    #[test]
    fn test_write_then_read_echoes_single_byte_values() {
        let mut bus = SimBus::new().with_device(SimulatedHand::new(50, Side::Left));
        let mut chan = ParamChannel::new(&mut bus, config(50));
        for v in [0, 1, 127, 128, 255] {
            chan.write(ParamKind::TorqueEnabled, v).unwrap();
            assert_eq!(chan.read(ParamKind::TorqueEnabled).unwrap(), v);
        }
    }

    #[test]
    fn test_writes_always_carry_two_bytes() {
        let mut bus = SimBus::new().with_device(SimulatedHand::new(50, Side::Left));
        ParamChannel::new(&mut bus, config(50))
            .write(ParamKind::TorqueEnabled, 1)
            .unwrap();
        assert_eq!(bus.sent()[0].payload(), &[1, 0]);
    }

    #[test]
    fn test_nonzero_status_is_reported() {
        let mut hand = SimulatedHand::new(50, Side::Left);
        hand.set_fault_status(Some(7));
        let mut bus = SimBus::new().with_device(hand);
        let err = ParamChannel::new(&mut bus, config(50))
            .read(ParamKind::HandSide)
            .unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Status {
                op: "read",
                status: 7,
                ..
            }
        ));
    }

    fn reply_frame(payload: &[u8]) -> CanFrame {
        let id = config(50)
            .request_id(MessageKind::ReadParam, ParamKind::Version)
            .unwrap()
            .reply_from(50)
            .unwrap();
        CanFrame::new(id.can_id().unwrap(), payload).unwrap()
    }

    #[test]
    fn test_reply_length_bounds() {
        for (payload, ok) in [
            (&[0u8][..], false),
            (&[0, 5][..], true),
            (&[0, 5, 0][..], true),
            (&[0, 5, 0, 0][..], false),
            (&[][..], false),
        ] {
            let mut bus = MockBus::new("mock0");
            bus.push_rx(reply_frame(payload));
            let res = ParamChannel::new(&mut bus, config(50)).read(ParamKind::Version);
            assert_eq!(res.is_ok(), ok, "payload {payload:?}");
            if !ok {
                assert!(matches!(res, Err(ChannelError::Framing(_))));
            }
        }
    }

    #[test]
    fn test_reply_from_new_id() {
        let mut bus = SimBus::new().with_device(SimulatedHand::new(50, Side::Left));
        ParamChannel::new(&mut bus, config(50))
            .write_expecting_reply_from(ParamKind::DeviceId, 60, 60)
            .unwrap();
        assert!(bus.device(60).is_some());
        assert!(bus.device(50).is_none());
    }

    #[test]
    fn test_silent_device_times_out() {
        let mut bus = MockBus::new("mock0");
        let err = ParamChannel::new(&mut bus, config(50))
            .read(ParamKind::HandSide)
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout { .. }));
        assert_eq!(bus.sent().len(), 1);
        assert!(bus.sent()[0].id.is_extended());
    }
}
