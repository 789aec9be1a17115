use crate::{ChannelError, Result};
use can_transport::{CanBus, CanFrame, CanId};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Frames read while waiting for one reply before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Bounded receive loop that picks the expected reply out of shared bus traffic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseMatcher {
    timeout: Duration,
    max_attempts: u32,
}

impl ResponseMatcher {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for a frame carrying `expected`.
    ///
    /// Any silent receive aborts the wait with [`ChannelError::Timeout`];
    /// frames with other ids are discarded and count against the attempt budget.
    pub fn await_frame<B: CanBus + ?Sized>(&self, bus: &mut B, expected: CanId) -> Result<CanFrame> {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        for attempt in 1..=self.max_attempts {
            match bus.recv(Some(timeout_ms)) {
                Ok(frame) if frame.id == expected => {
                    trace!(%frame, attempt, "matched reply");
                    return Ok(frame);
                }
                Ok(frame) => {
                    if is_stale_reply(&frame, expected) {
                        warn!(%frame, %expected, "discarding reply addressed to this host");
                    } else {
                        trace!(%frame, %expected, "discarding unrelated frame");
                    }
                }
                Err(e) if e.is_timeout() => {
                    return Err(ChannelError::Timeout {
                        expected: expected.raw(),
                        timeout_ms,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(%expected, attempts = self.max_attempts, "reply budget exhausted");
        Err(ChannelError::ExhaustedRetries {
            expected: expected.raw(),
            attempts: self.max_attempts,
        })
    }

    /// Send `request` and wait for `reply`; the caller must hold the bus for both.
    pub fn exchange<B: CanBus + ?Sized>(
        &self,
        bus: &mut B,
        request: &CanFrame,
        reply: CanId,
    ) -> Result<CanFrame> {
        trace!(frame = %request, "send");
        bus.send(request)?;
        self.await_frame(bus, reply)
    }
}

// Same target byte as ours but a different id: a reply meant for an earlier,
// abandoned exchange of this host.
fn is_stale_reply(frame: &CanFrame, expected: CanId) -> bool {
    frame.id.is_extended() && (frame.id.raw() >> 8) & 0xFF == (expected.raw() >> 8) & 0xFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use can_transport::MockBus;

    fn frame(raw: u32, payload: &[u8]) -> CanFrame {
        CanFrame::new(CanId::extended(raw).unwrap(), payload).unwrap()
    }

    #[test]
    fn test_matches_after_unrelated_traffic() {
        let expected = CanId::extended(0x0C62_AA32).unwrap();
        let mut bus = MockBus::new("mock0");
        bus.push_rx(frame(0x0C62_AA33, &[0]));
        bus.push_rx(CanFrame::new(CanId::standard(0x700).unwrap(), &[0; 4]).unwrap());
        bus.push_rx(frame(0x0C62_AA32, &[0, 1]));

        let matcher = ResponseMatcher::new(Duration::from_millis(5), DEFAULT_MAX_ATTEMPTS);
        let got = matcher.await_frame(&mut bus, expected).unwrap();
        assert_eq!(got.payload(), &[0, 1]);
        assert_eq!(bus.recv_calls(), 3);
    }

    #[test]
    fn test_standard_frame_with_same_number_is_not_a_match() {
        let expected = CanId::extended(0x0000_0123).unwrap();
        let mut bus = MockBus::new("mock0");
        bus.push_rx(CanFrame::new(CanId::standard(0x123).unwrap(), &[]).unwrap());
        let matcher = ResponseMatcher::new(Duration::from_millis(5), 3);
        assert!(matches!(
            matcher.await_frame(&mut bus, expected),
            Err(ChannelError::Timeout { .. })
        ));
    }

    #[test]
    fn test_single_timeout_aborts() {
        let expected = CanId::extended(0x0C62_AA32).unwrap();
        let mut bus = MockBus::new("mock0");
        bus.push_rx(frame(0x0C62_AA40, &[0]));
        let matcher = ResponseMatcher::new(Duration::from_millis(5), DEFAULT_MAX_ATTEMPTS);
        let err = matcher.await_frame(&mut bus, expected).unwrap_err();
        assert!(matches!(err, ChannelError::Timeout { timeout_ms: 5, .. }));
        assert!(err.is_recoverable());
        assert_eq!(bus.recv_calls(), 2);
    }

    #[test]
    fn test_exhausts_budget_on_endless_noise() {
        let expected = CanId::extended(0x0C62_AA32).unwrap();
        let mut bus = MockBus::new("mock0");
        bus.set_idle_traffic(Some(frame(0x0C62_AA33, &[0])));
        let matcher = ResponseMatcher::new(Duration::from_millis(5), DEFAULT_MAX_ATTEMPTS);
        let err = matcher.await_frame(&mut bus, expected).unwrap_err();
        assert!(matches!(
            err,
            ChannelError::ExhaustedRetries { attempts: 10, .. }
        ));
        assert!(err.is_recoverable());
        assert_eq!(bus.recv_calls(), 10);
    }

    #[test]
    fn test_exchange_sends_before_waiting() {
        let mut bus = MockBus::new("mock0");
        let reply = frame(0x0C62_AA32, &[0]);
        bus.push_rx(reply.clone());
        let matcher = ResponseMatcher::new(Duration::from_millis(5), 2);
        let request = frame(0x0C42_32AA, &[]);
        matcher.exchange(&mut bus, &request, reply.id).unwrap();
        assert_eq!(bus.sent(), &[request]);
    }
}
