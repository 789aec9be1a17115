use crate::DriverError;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Driver counters on their own registry.
#[derive(Clone)]
pub struct DriverMetrics {
    pub registry: Registry,
    pub operations: IntCounterVec,
    pub errors: IntCounterVec,
    pub dropped_cycles: IntCounter,
    pub clamped_targets: IntCounter,
}

impl DriverMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let operations = IntCounterVec::new(
            Opts::new("hand_operations_total", "Driver operations attempted"),
            &["op"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("hand_errors_total", "Driver operations failed, by error kind"),
            &["kind"],
        )?;
        let dropped_cycles = IntCounter::new(
            "hand_dropped_cycles_total",
            "Follow-loop cycles lost to timeouts",
        )?;
        let clamped_targets = IntCounter::new(
            "hand_clamped_targets_total",
            "Joint targets clamped into their limits",
        )?;
        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(dropped_cycles.clone()))?;
        registry.register(Box::new(clamped_targets.clone()))?;
        Ok(Self {
            registry,
            operations,
            errors,
            dropped_cycles,
            clamped_targets,
        })
    }

    pub(crate) fn observe<T>(&self, op: &str, result: &Result<T, DriverError>) {
        self.operations.with_label_values(&[op]).inc();
        if let Err(e) = result {
            self.errors.with_label_values(&[e.kind()]).inc();
        }
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_counts_errors_by_kind() {
        let m = DriverMetrics::new().unwrap();
        m.observe::<()>("enable", &Ok(()));
        m.observe::<()>("enable", &Err(DriverError::UnknownGrasp("x".into())));
        assert_eq!(m.operations.with_label_values(&["enable"]).get(), 2);
        assert_eq!(m.errors.with_label_values(&["unknown_grasp"]).get(), 1);
        let text = m.encode_text();
        assert!(text.contains("hand_operations_total"));
        assert!(text.contains("kind=\"unknown_grasp\""));
    }
}
