use crate::{BusInfo, CanBus, CanFrame, Result, TransportError};
use std::collections::VecDeque;

/// A scripted in-process bus. Frames queued with [`MockBus::push_rx`] are
/// handed out by `recv` in order; sent frames are recorded for inspection.
///
/// When the queue is empty `recv` either replays the idle frame (simulating
/// unrelated traffic) or reports a timeout immediately.
#[derive(Debug, Default)]
pub struct MockBus {
    name: String,
    rx: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    idle: Option<CanFrame>,
    recv_calls: usize,
}

impl MockBus {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn push_rx(&mut self, frame: CanFrame) {
        self.rx.push_back(frame);
    }

    /// Traffic returned forever once the scripted queue drains.
    pub fn set_idle_traffic(&mut self, frame: Option<CanFrame>) {
        self.idle = frame;
    }

    pub fn sent(&self) -> &[CanFrame] {
        &self.sent
    }

    pub fn recv_calls(&self) -> usize {
        self.recv_calls
    }
}

impl CanBus for MockBus {
    fn open(name: &str) -> Result<Self> {
        Ok(Self::new(name))
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<CanFrame> {
        self.recv_calls += 1;
        if let Some(frame) = self.rx.pop_front() {
            return Ok(frame.stamped_now());
        }
        match &self.idle {
            Some(frame) => Ok(frame.clone().stamped_now()),
            None => Err(TransportError::Timeout),
        }
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        tracing::trace!(bus = %self.name, %frame, "mock send");
        self.sent.push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CanId;

    #[test]
    fn test_scripted_then_timeout() -> anyhow::Result<()> {
        let mut bus = MockBus::open("mock0")?;
        let id = CanId::standard(0x10).ok_or_else(|| anyhow::anyhow!("id"))?;
        let frame = CanFrame::new(id, &[1]).ok_or_else(|| anyhow::anyhow!("len"))?;
        bus.push_rx(frame.clone());

        let got = bus.recv(Some(10))?;
        assert_eq!(got.payload(), frame.payload());
        assert!(got.timestamp.is_some());
        assert!(matches!(bus.recv(Some(10)), Err(TransportError::Timeout)));
        assert_eq!(bus.recv_calls(), 2);
        Ok(())
    }

    #[test]
    fn test_idle_traffic_and_sent_log() -> anyhow::Result<()> {
        let mut bus = MockBus::new("mock0");
        let id = CanId::standard(0x700).ok_or_else(|| anyhow::anyhow!("id"))?;
        let heartbeat = CanFrame::new(id, &[0, 0, 0, 0]).ok_or_else(|| anyhow::anyhow!("len"))?;
        bus.set_idle_traffic(Some(heartbeat));
        for _ in 0..3 {
            assert_eq!(bus.recv(None)?.id, id);
        }
        bus.send(&CanFrame::new(id, &[9]).ok_or_else(|| anyhow::anyhow!("len"))?)?;
        assert_eq!(bus.sent().len(), 1);
        Ok(())
    }
}
