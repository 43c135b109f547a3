use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Data-plane counters for one device. Written by the IO thread only through atomics.
#[derive(Debug)]
pub struct DeviceMetrics {
    device_name: String,
    cycles: AtomicU64,
    dropped_cycles: AtomicU64,
    faults: AtomicU64,
    drain_timeouts: AtomicU64,
    teardowns: AtomicU64,
    total_cycle_ns: AtomicU64,
}

impl DeviceMetrics {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            cycles: AtomicU64::new(0),
            dropped_cycles: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            drain_timeouts: AtomicU64::new(0),
            teardowns: AtomicU64::new(0),
            total_cycle_ns: AtomicU64::new(0),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn dropped_cycles(&self) -> u64 {
        self.dropped_cycles.load(Ordering::Relaxed)
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub fn drain_timeouts(&self) -> u64 {
        self.drain_timeouts.load(Ordering::Relaxed)
    }

    pub fn teardowns(&self) -> u64 {
        self.teardowns.load(Ordering::Relaxed)
    }

    pub fn start_cycle(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_cycle(&self, start: Instant) {
        let elapsed_ns = start.elapsed().as_nanos() as u64;
        self.total_cycle_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, missed: u64) {
        self.dropped_cycles.fetch_add(missed, Ordering::Relaxed);
    }

    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain_timeout(&self) {
        self.drain_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_cycle_us(&self) -> u64 {
        let cycles = self.cycles();
        if cycles == 0 {
            return 0;
        }
        self.total_cycle_ns.load(Ordering::Relaxed) / cycles / 1_000
    }
}
