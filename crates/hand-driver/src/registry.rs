use crate::{DriverError, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Device ids claimed by drivers on one bus.
///
/// Clones share the same set. Discovery skips claimed ids, so each
/// `connect` on a shared bus binds a different hand.
#[derive(Debug, Clone, Default)]
pub struct HandRegistry {
    claimed: Arc<Mutex<BTreeSet<u8>>>,
}

impl HandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the set cannot leave it inconsistent.
    fn set(&self) -> MutexGuard<'_, BTreeSet<u8>> {
        self.claimed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn claim(&self, device_id: u8) -> Result<()> {
        if !self.set().insert(device_id) {
            return Err(DriverError::DeviceIdInUse(device_id));
        }
        debug!(device_id, "claimed");
        Ok(())
    }

    /// Returns whether the id was claimed.
    pub fn release(&self, device_id: u8) -> bool {
        let released = self.set().remove(&device_id);
        if released {
            debug!(device_id, "released");
        }
        released
    }

    pub fn is_claimed(&self, device_id: u8) -> bool {
        self.set().contains(&device_id)
    }

    pub fn claimed(&self) -> Vec<u8> {
        self.set().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exclusive_across_clones() {
        let reg = HandRegistry::new();
        let other = reg.clone();
        reg.claim(50).unwrap();
        assert!(matches!(other.claim(50), Err(DriverError::DeviceIdInUse(50))));
        assert!(other.is_claimed(50));
        assert!(other.release(50));
        assert!(!reg.release(50));
        other.claim(50).unwrap();
        assert_eq!(reg.claimed(), vec![50]);
    }
}
