use crate::timer::{duration_ns, Timer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Virtual clock for tests and rehearsals. Time only moves when something
/// waits on it or calls [`SimulatedTimer::advance`]. Clones share one clock.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTimer {
    now_ns: Arc<AtomicU64>,
    overshoot_ns: u64,
}

impl SimulatedTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every wait lands this late, like a real spin loop's last iteration.
    pub fn with_overshoot(mut self, overshoot: Duration) -> Self {
        self.overshoot_ns = duration_ns(overshoot);
        self
    }

    /// Simulates work that takes `d` (e.g. a slow sink write).
    pub fn advance(&self, d: Duration) {
        self.now_ns.fetch_add(duration_ns(d), Ordering::SeqCst);
    }
}

impl Timer for SimulatedTimer {
    fn now(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    fn sleep(&self, d: Duration) {
        self.now_ns
            .fetch_add(duration_ns(d) + self.overshoot_ns, Ordering::SeqCst);
    }

    fn spin_until(&self, deadline_ns: u64) {
        let target = deadline_ns + self.overshoot_ns;
        self.now_ns.fetch_max(target, Ordering::SeqCst);
    }
}
