use portable_atomic::AtomicF64;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

static HOST_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic host time in nanoseconds since the first call in this process.
pub fn host_time_now() -> u64 {
    let epoch = HOST_EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Most recent point where the device's ring buffer wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZeroTimestamp {
    pub sample_time: u64,
    pub host_time: u64,
    pub seed: u64,
}

/// Host-to-device time mapping, fixed for the duration of one IO run.
#[derive(Debug, Default)]
pub struct ClockAnchor {
    host_time: AtomicU64,
    sample_rate: AtomicF64,
    ring_frames: AtomicU32,
    seed: AtomicU64,
}

impl ClockAnchor {
    pub fn anchor(&self, host_time: u64, sample_rate: f64, ring_frames: u32, seed: u64) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
        self.ring_frames.store(ring_frames, Ordering::Relaxed);
        self.seed.store(seed, Ordering::Relaxed);
        self.host_time.store(host_time, Ordering::Release);
    }

    pub fn anchor_host_time(&self) -> u64 {
        self.host_time.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    /// Device sample time at `host_time`. Times before the anchor map to 0.
    pub fn sample_time_at(&self, host_time: u64) -> u64 {
        let elapsed = host_time.saturating_sub(self.anchor_host_time());
        (elapsed as f64 * self.sample_rate() / NANOS_PER_SEC) as u64
    }

    pub fn host_time_at(&self, sample_time: u64) -> u64 {
        let rate = self.sample_rate();
        if rate <= 0.0 {
            return self.anchor_host_time();
        }
        self.anchor_host_time() + (sample_time as f64 * NANOS_PER_SEC / rate) as u64
    }

    pub fn seed(&self) -> u64 {
        self.seed.load(Ordering::Relaxed)
    }

    pub fn timestamp_at_sample(&self, sample_time: u64) -> ZeroTimestamp {
        ZeroTimestamp {
            sample_time,
            host_time: self.host_time_at(sample_time),
            seed: self.seed(),
        }
    }

    pub fn zero_timestamp_at(&self, host_time: u64) -> ZeroTimestamp {
        let ring = u64::from(self.ring_frames.load(Ordering::Relaxed).max(1));
        self.timestamp_at_sample((self.sample_time_at(host_time) / ring) * ring)
    }
}
