use crate::{CanBus, Result, TransportError};
use std::sync::{Arc, Mutex, MutexGuard};

/// A cloneable handle to one physical bus.
///
/// Every clone talks to the same backend. Holding the guard returned by
/// [`SharedBus::lock`] gives exclusive use of the bus, so a request and the
/// wait for its reply must happen under one guard.
pub struct SharedBus<B> {
    inner: Arc<Mutex<B>>,
}

impl<B: CanBus> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bus)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, B>> {
        self.inner.lock().map_err(|_| TransportError::Poisoned)
    }

    /// Number of live handles, including this one.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::{CanFrame, CanId, MockBus};

    #[test]
    fn test_clones_share_backend() -> anyhow::Result<()> {
        let bus = SharedBus::new(MockBus::new("mock0"));
        let other = bus.clone();
        assert_eq!(bus.handles(), 2);

        let id = CanId::extended(0x0C41_AA32).ok_or_else(|| anyhow::anyhow!("id"))?;
        let frame = CanFrame::new(id, &[]).ok_or_else(|| anyhow::anyhow!("len"))?;
        other.lock()?.send(&frame)?;
        assert_eq!(bus.lock()?.sent().len(), 1);
        Ok(())
    }

    #[test]
    fn test_cross_thread_use() -> anyhow::Result<()> {
        let bus = SharedBus::new(MockBus::new("mock0"));
        let id = CanId::standard(0x42).ok_or_else(|| anyhow::anyhow!("id"))?;
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                std::thread::spawn(move || -> Result<()> {
                    let frame = CanFrame::new(id, &[1]).ok_or(TransportError::InvalidFrame("len"))?;
                    bus.lock()?.send(&frame)
                })
            })
            .collect();
        for h in handles {
            h.join().map_err(|_| anyhow::anyhow!("thread panicked"))??;
        }
        assert_eq!(bus.lock()?.sent().len(), 4);
        Ok(())
    }
}
