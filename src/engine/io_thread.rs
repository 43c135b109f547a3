use super::{host_time_now, AtomicIoState, ClockAnchor};
use crate::buffers::SharedRegion;
use crate::core::ObjectId;
use crate::error::{DriverError, Result};
use crate::hal::format_converter::{apply_gain, fill_silence};
use crate::hal::types::{Direction, SampleFormat};
use crate::observability::DeviceMetrics;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use portable_atomic::AtomicF32;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Parameter values the IO thread works with during one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoParams {
    pub input_gain: f32,
    pub output_gain: f32,
    pub input_muted: bool,
    pub output_muted: bool,
}

impl IoParams {
    pub fn gain(&self, direction: Direction) -> f32 {
        match direction {
            Direction::Input if self.input_muted => 0.0,
            Direction::Output if self.output_muted => 0.0,
            Direction::Input => self.input_gain,
            Direction::Output => self.output_gain,
        }
    }
}

impl Default for IoParams {
    fn default() -> Self {
        Self {
            input_gain: 1.0,
            output_gain: 1.0,
            input_muted: false,
            output_muted: false,
        }
    }
}

/// Pending side of the parameter double buffer.
///
/// Controls write here at any time; the IO thread copies the bank into its
/// active `IoParams` only at a cycle boundary, when the generation moved.
#[derive(Debug)]
pub struct ParamBank {
    input_gain: AtomicF32,
    output_gain: AtomicF32,
    input_muted: AtomicBool,
    output_muted: AtomicBool,
    generation: AtomicU64,
}

impl Default for ParamBank {
    fn default() -> Self {
        let defaults = IoParams::default();
        Self {
            input_gain: AtomicF32::new(defaults.input_gain),
            output_gain: AtomicF32::new(defaults.output_gain),
            input_muted: AtomicBool::new(defaults.input_muted),
            output_muted: AtomicBool::new(defaults.output_muted),
            generation: AtomicU64::new(0),
        }
    }
}

impl ParamBank {
    pub fn set_gain(&self, direction: Direction, gain: f32) {
        match direction {
            Direction::Input => self.input_gain.store(gain, Ordering::Relaxed),
            Direction::Output => self.output_gain.store(gain, Ordering::Relaxed),
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn set_muted(&self, direction: Direction, muted: bool) {
        match direction {
            Direction::Input => self.input_muted.store(muted, Ordering::Relaxed),
            Direction::Output => self.output_muted.store(muted, Ordering::Relaxed),
        }
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> IoParams {
        IoParams {
            input_gain: self.input_gain.load(Ordering::Relaxed),
            output_gain: self.output_gain.load(Ordering::Relaxed),
            input_muted: self.input_muted.load(Ordering::Relaxed),
            output_muted: self.output_muted.load(Ordering::Relaxed),
        }
    }

    /// Copies pending values into `active` if anything changed since `seen`.
    pub fn refresh(&self, active: &mut IoParams, seen: &mut u64) -> bool {
        let generation = self.generation();
        if generation == *seen {
            return false;
        }
        *active = self.snapshot();
        *seen = generation;
        true
    }
}

/// State shared between a device's control plane and its IO thread.
/// Everything here is lock-free.
#[derive(Debug)]
pub struct IoShared {
    state: AtomicIoState,
    clock: ClockAnchor,
    params: ParamBank,
    metrics: Arc<DeviceMetrics>,
    stop: AtomicBool,
    epoch: AtomicU64,
    stall_ns: AtomicU64,
}

impl IoShared {
    pub fn new(metrics: Arc<DeviceMetrics>) -> Self {
        Self {
            state: AtomicIoState::default(),
            clock: ClockAnchor::default(),
            params: ParamBank::default(),
            metrics,
            stop: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            stall_ns: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> &AtomicIoState {
        &self.state
    }

    pub fn clock(&self) -> &ClockAnchor {
        &self.clock
    }

    pub fn params(&self) -> &ParamBank {
        &self.params
    }

    pub fn metrics(&self) -> &Arc<DeviceMetrics> {
        &self.metrics
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Opens a new run and returns its epoch.
    pub(crate) fn begin_run(&self) -> u64 {
        self.stop.store(false, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Invalidates the current run: a thread still inside it exits without
    /// touching shared state when it wakes up.
    pub(crate) fn fence(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn inject_stall(&self, duration: Duration) {
        self.stall_ns.store(duration.as_nanos() as u64, Ordering::Release);
    }

    fn is_current(&self, epoch: u64) -> bool {
        !self.stop.load(Ordering::Acquire) && self.epoch() == epoch
    }
}

/// A stream's region, resolved when IO starts.
pub(crate) struct StreamSlot {
    pub id: ObjectId,
    pub direction: Direction,
    pub format: SampleFormat,
    pub region: Arc<SharedRegion>,
    pub active: Arc<AtomicBool>,
}

/// Everything the IO thread owns for one run. Buffers are sized up front.
pub(crate) struct IoContext {
    device: ObjectId,
    buffer_frames: u32,
    ring_frames: u32,
    sample_rate: f64,
    slots: Vec<StreamSlot>,
    loopback: Vec<u8>,
    scratch: Vec<u8>,
}

impl IoContext {
    pub fn new(
        device: ObjectId,
        buffer_frames: u32,
        ring_frames: u32,
        sample_rate: f64,
        slots: Vec<StreamSlot>,
    ) -> Self {
        let max_frame = slots
            .iter()
            .map(|slot| slot.region.bytes_per_frame())
            .max()
            .unwrap_or(0);
        let len = max_frame * buffer_frames as usize;

        Self {
            device,
            buffer_frames,
            ring_frames,
            sample_rate,
            slots,
            loopback: vec![0; len],
            scratch: vec![0; len],
        }
    }

    fn period_ns(&self) -> f64 {
        f64::from(self.buffer_frames) * 1_000_000_000.0 / self.sample_rate
    }

    /// One IO period starting at `sample_time`: consume output, feed input.
    /// Nothing here logs; teardowns are only counted.
    fn process(&mut self, sample_time: u64, params: &IoParams, clock: &ClockAnchor, metrics: &DeviceMetrics) {
        let IoContext {
            buffer_frames,
            ring_frames,
            slots,
            loopback,
            scratch,
            ..
        } = self;

        let frames = *buffer_frames as usize;
        let end = sample_time + frames as u64;
        let mut looped: Option<(SampleFormat, usize)> = None;

        for slot in slots.iter().filter(|s| s.direction == Direction::Output) {
            if slot.region.complete_teardown() {
                metrics.record_teardown();
            }
            if !slot.active.load(Ordering::Relaxed) {
                continue;
            }
            if looped.is_none() {
                let bytes_per_frame = slot.region.bytes_per_frame();
                let buf = &mut loopback[..frames * bytes_per_frame];
                slot.region.read_frames(sample_time, buf);
                apply_gain(slot.format, buf, params.gain(Direction::Output));
                looped = Some((slot.format, bytes_per_frame));
            }
            slot.region.set_producer_index(end);
        }

        for slot in slots.iter().filter(|s| s.direction == Direction::Input) {
            if slot.region.complete_teardown() {
                metrics.record_teardown();
            }
            if !slot.active.load(Ordering::Relaxed) {
                continue;
            }
            let bytes_per_frame = slot.region.bytes_per_frame();
            let len = frames * bytes_per_frame;
            let buf = &mut scratch[..len];
            match looped {
                Some((format, looped_bpf)) if format == slot.format && looped_bpf == bytes_per_frame => {
                    buf.copy_from_slice(&loopback[..len])
                }
                _ => fill_silence(slot.format, buf),
            }
            apply_gain(slot.format, buf, params.gain(Direction::Input));
            slot.region.write_frames(sample_time, buf);
            slot.region.set_producer_index(end);
        }

        let ring = u64::from((*ring_frames).max(1));
        if sample_time == 0 || end / ring != sample_time / ring {
            let timestamp = clock.timestamp_at_sample((end / ring) * ring);
            for slot in slots.iter() {
                slot.region.publish_zero_timestamp(timestamp);
            }
        }
    }
}

/// Handle on a running IO thread.
pub struct IoThread {
    handle: JoinHandle<()>,
    done: Receiver<()>,
    epoch: u64,
}

impl IoThread {
    pub(crate) fn spawn(ctx: IoContext, shared: Arc<IoShared>, epoch: u64) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let device = ctx.device;

        let handle = thread::Builder::new()
            .name(format!("simple-audio-io-{}", device.raw()))
            .spawn(move || {
                let _ = ready_tx.send(());
                let result = catch_unwind(AssertUnwindSafe(|| run(ctx, &shared, epoch)));
                if result.is_err() {
                    shared.metrics.record_fault();
                    tracing::error!(device = %device, "IO thread panicked");
                }
                let _ = done_tx.send(());
            })
            .map_err(|e| DriverError::internal(format!("failed to spawn IO thread: {}", e)))?;

        let thread = Self {
            handle,
            done: done_rx,
            epoch,
        };

        if ready_rx.recv_timeout(READY_TIMEOUT).is_err() {
            return Err(DriverError::internal(format!(
                "IO thread for device {} never signalled ready",
                device
            )));
        }

        Ok(thread)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn request_stop(&self, shared: &IoShared) {
        shared.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();
    }

    /// Waits for the thread to leave its loop. On timeout the thread is
    /// detached and `false` is returned; the caller must fence the epoch.
    pub(crate) fn drain(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    tracing::error!("IO thread terminated abnormally");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

fn run(mut ctx: IoContext, shared: &IoShared, epoch: u64) {
    let metrics = &shared.metrics;
    let anchor = shared.clock.anchor_host_time();
    let period_ns = ctx.period_ns();
    let mut params = shared.params.snapshot();
    let mut seen = shared.params.generation();
    let mut cycle: u64 = 0;

    tracing::debug!(
        device = %ctx.device,
        epoch,
        streams = ctx.slots.len(),
        period_us = period_ns / 1_000.0,
        "IO thread running"
    );

    loop {
        let deadline = anchor + (cycle as f64 * period_ns) as u64;
        if !wait_until(shared, epoch, deadline) {
            break;
        }

        let late = host_time_now().saturating_sub(deadline);
        if late as f64 >= period_ns {
            let missed = (late as f64 / period_ns) as u64;
            metrics.record_dropped(missed);
            cycle += missed;
        }

        let start = metrics.start_cycle();
        shared.params.refresh(&mut params, &mut seen);
        let sample_time = cycle * u64::from(ctx.buffer_frames);
        ctx.process(sample_time, &params, &shared.clock, metrics);
        metrics.finish_cycle(start);

        cycle += 1;
    }

    tracing::debug!(device = %ctx.device, epoch, cycles = cycle, "IO thread exiting");
}

/// Parks until `deadline`. Returns false once the run is stopped or fenced.
fn wait_until(shared: &IoShared, epoch: u64, deadline: u64) -> bool {
    loop {
        let stall = shared.stall_ns.swap(0, Ordering::AcqRel);
        if stall > 0 {
            thread::sleep(Duration::from_nanos(stall));
        }
        if !shared.is_current(epoch) {
            return false;
        }
        let now = host_time_now();
        if now >= deadline {
            return true;
        }
        thread::park_timeout(Duration::from_nanos(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::types::StreamFormat;

    #[test]
    fn test_param_bank_publishes_at_refresh() {
        let bank = ParamBank::default();
        let mut active = bank.snapshot();
        let mut seen = bank.generation();

        bank.set_gain(Direction::Output, 0.25);
        // Nothing changes until the boundary refresh
        assert_eq!(active.output_gain, 1.0);

        assert!(bank.refresh(&mut active, &mut seen));
        assert_eq!(active.output_gain, 0.25);
        assert!(!bank.refresh(&mut active, &mut seen));
    }

    #[test]
    fn test_mute_overrides_gain() {
        let params = IoParams {
            input_muted: true,
            ..IoParams::default()
        };
        assert_eq!(params.gain(Direction::Input), 0.0);
        assert_eq!(params.gain(Direction::Output), 1.0);
    }

    fn slot(id: u32, direction: Direction, format: StreamFormat, ring: u32) -> StreamSlot {
        StreamSlot {
            id: ObjectId::new(id),
            direction,
            format: format.sample_format,
            region: Arc::new(SharedRegion::new(direction, format, ring).unwrap()),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    #[test]
    fn test_process_loops_output_into_input() {
        let format = StreamFormat::new(48000.0, 1, SampleFormat::I16);
        let output = slot(40, Direction::Output, format, 64);
        let input = slot(41, Direction::Input, format, 64);
        let out_region = output.region.clone();
        let in_region = input.region.clone();

        let frames: Vec<u8> = (1..=16i16).flat_map(|v| (v * 100).to_le_bytes()).collect();
        out_region.write_frames(0, &frames);

        let clock = ClockAnchor::default();
        clock.anchor(0, 48000.0, 64, 1);
        let metrics = DeviceMetrics::new("test");
        let mut ctx = IoContext::new(ObjectId::new(32), 16, 64, 48000.0, vec![output, input]);

        let params = IoParams {
            input_gain: 0.5,
            ..IoParams::default()
        };
        ctx.process(0, &params, &clock, &metrics);

        let mut looped = vec![0u8; 32];
        in_region.read_frames(0, &mut looped);
        let samples: Vec<i16> = looped
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples[0], 50);
        assert_eq!(samples[15], 800);

        assert_eq!(in_region.producer_index(), 16);
        assert_eq!(out_region.producer_index(), 16);
        assert_eq!(in_region.zero_timestamp().seed, 1);
    }

    #[test]
    fn test_inactive_stream_is_skipped() {
        let format = StreamFormat::new(48000.0, 2, SampleFormat::F32);
        let input = slot(41, Direction::Input, format, 64);
        input.active.store(false, Ordering::Relaxed);
        let region = input.region.clone();

        let clock = ClockAnchor::default();
        let metrics = DeviceMetrics::new("test");
        let mut ctx = IoContext::new(ObjectId::new(32), 16, 64, 48000.0, vec![input]);
        ctx.process(16, &IoParams::default(), &clock, &metrics);

        assert_eq!(region.producer_index(), 0);
    }

    #[test]
    fn test_teardown_is_counted_at_cycle_boundary() {
        let format = StreamFormat::new(48000.0, 2, SampleFormat::I16);
        let input = slot(41, Direction::Input, format, 64);
        let region = input.region.clone();
        region.attach_client();
        region.set_consumer_index(32);
        assert!(region.detach_client());

        let clock = ClockAnchor::default();
        let metrics = DeviceMetrics::new("test");
        let mut ctx = IoContext::new(ObjectId::new(32), 16, 64, 48000.0, vec![input]);
        ctx.process(0, &IoParams::default(), &clock, &metrics);
        ctx.process(16, &IoParams::default(), &clock, &metrics);

        assert_eq!(metrics.teardowns(), 1);
        assert!(!region.teardown_pending());
        assert_eq!(region.consumer_index(), 0);
    }
}
