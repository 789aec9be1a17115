//! Streaming joint targets from an external producer into a hand.

use crate::{DriverError, HandDriver, Result};
use anyhow::Context;
use can_transport::CanBus;
use hand_protocol::Side;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Producer of joint targets, radians, one vector per call.
pub trait JointTargetSource {
    /// `None` ends the stream.
    fn next_targets(&mut self, side: Side) -> Option<Vec<f32>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowReport {
    pub cycles: u64,
    pub dropped: u64,
}

/// Fixed-cadence loop commanding every target a source produces.
#[derive(Debug, Clone, Copy)]
pub struct FollowLoop {
    period: Duration,
    max_consecutive_drops: u32,
}

impl FollowLoop {
    pub const DEFAULT_RATE_HZ: f32 = 50.0;
    pub const DEFAULT_MAX_CONSECUTIVE_DROPS: u32 = 10;

    pub fn new(rate_hz: f32) -> Result<Self> {
        if !(rate_hz > 0.0 && rate_hz.is_finite()) {
            return Err(DriverError::out_of_range(
                "follow rate",
                format!("{rate_hz} Hz"),
            ));
        }
        Ok(Self {
            period: Duration::from_secs_f64(1.0 / f64::from(rate_hz)),
            max_consecutive_drops: Self::DEFAULT_MAX_CONSECUTIVE_DROPS,
        })
    }

    pub fn with_max_consecutive_drops(mut self, drops: u32) -> Self {
        self.max_consecutive_drops = drops.max(1);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run until the source ends. Timeouts drop the cycle; a run of
    /// `max_consecutive_drops` of them, or any other error, ends the loop.
    pub fn run<B: CanBus, S: JointTargetSource + ?Sized>(
        &self,
        driver: &mut HandDriver<B>,
        source: &mut S,
    ) -> Result<FollowReport> {
        let side = driver.side()?;
        info!(device_id = driver.device_id(), %side, period = ?self.period, "following targets");
        let mut report = FollowReport::default();
        let mut consecutive = 0u32;
        loop {
            let started = Instant::now();
            let Some(targets) = source.next_targets(side) else {
                break;
            };
            report.cycles += 1;
            match driver.set_positions(&targets) {
                Ok(()) => consecutive = 0,
                Err(e) if e.is_recoverable() => {
                    report.dropped += 1;
                    consecutive += 1;
                    if let Some(m) = driver.metrics() {
                        m.dropped_cycles.inc();
                    }
                    warn!(cycle = report.cycles, consecutive, error = %e, "dropped cycle");
                    if consecutive >= self.max_consecutive_drops {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
            thread::sleep(self.period.saturating_sub(started.elapsed()));
        }
        debug!(cycles = report.cycles, dropped = report.dropped, "target stream ended");
        Ok(report)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TargetLine {
    Both(Vec<f32>),
    PerSide {
        left: Option<Vec<f32>>,
        right: Option<Vec<f32>>,
    },
}

/// JSON-lines targets: each line is either an array applied to any hand or
/// an object with `left` and/or `right` arrays. Lines without targets for
/// the requested side, and lines that do not parse, are skipped.
pub struct JsonlTargets<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
}

impl JsonlTargets<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("opening targets: {}", path.display()))?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> JsonlTargets<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> JointTargetSource for JsonlTargets<R> {
    fn next_targets(&mut self, side: Side) -> Option<Vec<f32>> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => {
                    warn!(error = %e, "target stream read failed");
                    return None;
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TargetLine>(&line) {
                Ok(TargetLine::Both(v)) => return Some(v),
                Ok(TargetLine::PerSide { left, right }) => {
                    let picked = match side {
                        Side::Left => left,
                        Side::Right => right,
                    };
                    if picked.is_some() {
                        return picked;
                    }
                }
                Err(e) => warn!(line = self.line_no, error = %e, "skipping target line"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DriverMetrics, HandConfig, HandRegistry};
    use can_transport::SharedBus;
    use hand_protocol::sim::{SimBus, SimulatedHand};
    use hand_protocol::ParamKind;
    use std::collections::VecDeque;
    use std::io::Cursor;

    fn bus() -> SharedBus<SimBus> {
        SharedBus::new(SimBus::new().with_device(SimulatedHand::new(50, Side::Right)))
    }

    struct Scripted {
        frames: VecDeque<Vec<f32>>,
        bus: SharedBus<SimBus>,
        // Cycles during which the hand stays silent.
        silent_cycles: Vec<usize>,
        cycle: usize,
    }

    impl JointTargetSource for Scripted {
        fn next_targets(&mut self, side: Side) -> Option<Vec<f32>> {
            assert_eq!(side, Side::Right);
            let silent = self.silent_cycles.contains(&self.cycle);
            self.bus
                .lock()
                .unwrap()
                .device_mut(50)
                .unwrap()
                .set_silent(silent);
            self.cycle += 1;
            self.frames.pop_front()
        }
    }

    #[test]
    fn test_rate_validation() {
        assert!(FollowLoop::new(0.0).is_err());
        assert!(FollowLoop::new(f32::NAN).is_err());
        assert_eq!(
            FollowLoop::new(50.0).unwrap().period(),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_follow_counts_dropped_cycles() {
        let bus = bus();
        let metrics = DriverMetrics::new().unwrap();
        let mut hand =
            HandDriver::connect(bus.clone(), &HandConfig::for_device(50), &HandRegistry::new())
                .unwrap()
                .with_metrics(metrics.clone());
        let mut source = Scripted {
            frames: (0..5).map(|i| vec![i as f32 * 0.1; 10]).collect(),
            bus: bus.clone(),
            silent_cycles: vec![1, 2],
            cycle: 0,
        };
        let report = FollowLoop::new(1000.0)
            .unwrap()
            .run(&mut hand, &mut source)
            .unwrap();
        assert_eq!(report, FollowReport { cycles: 5, dropped: 2 });
        assert_eq!(metrics.dropped_cycles.get(), 2);
        let last = bus
            .lock()
            .unwrap()
            .device(50)
            .unwrap()
            .joint_values(ParamKind::TargetPosition)
            .to_vec();
        assert_eq!(last, vec![400; 10]);
    }

    #[test]
    fn test_follow_gives_up_after_consecutive_drops() {
        let bus = bus();
        let mut hand =
            HandDriver::connect(bus.clone(), &HandConfig::for_device(50), &HandRegistry::new())
                .unwrap();
        let mut source = Scripted {
            frames: (0..10).map(|_| vec![0.0; 10]).collect(),
            bus: bus.clone(),
            silent_cycles: (2..10).collect(),
            cycle: 0,
        };
        let err = FollowLoop::new(1000.0)
            .unwrap()
            .with_max_consecutive_drops(3)
            .run(&mut hand, &mut source)
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(source.cycle, 5);
    }

    #[test]
    fn test_jsonl_sides_and_bad_lines() {
        let text = "\
[0.1, 0.2]
{\"left\": [1.0], \"right\": [2.0]}
not json

{\"left\": [3.0]}
{\"right\": [4.0]}
";
        let mut src = JsonlTargets::from_reader(Cursor::new(text));
        assert_eq!(src.next_targets(Side::Right), Some(vec![0.1, 0.2]));
        assert_eq!(src.next_targets(Side::Right), Some(vec![2.0]));
        assert_eq!(src.next_targets(Side::Right), Some(vec![4.0]));
        assert_eq!(src.next_targets(Side::Right), None);
    }
}
