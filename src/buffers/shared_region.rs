use crate::engine::ZeroTimestamp;
use crate::error::{DriverError, Result};
use crate::hal::types::{Direction, SampleFormat, StreamFormat};
use memmap2::MmapMut;
use portable_atomic::AtomicF64;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

pub const REGION_MAGIC: &[u8; 8] = b"SAUDRING";
pub const REGION_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 64;

const OFFSET_BYTES_PER_FRAME: usize = 12;
const OFFSET_CAPACITY: usize = 16;
const OFFSET_CHANNELS: usize = 20;
const OFFSET_PRODUCER: usize = 24;
const OFFSET_CONSUMER: usize = 32;
const OFFSET_ZERO_SAMPLE: usize = 40;
const OFFSET_ZERO_HOST: usize = 48;
const OFFSET_ZERO_SEED: usize = 56;

/// Ring of audio frames shared between the driver's IO thread and a client.
///
/// Layout: a 64-byte header followed by `capacity` frames.
///
/// ```text
///  0  magic "SAUDRING"        24  producer index (u64, driver)
///  8  version (u32)           32  consumer index (u64, client)
/// 12  bytes per frame (u32)   40  zero timestamp sample time (u64)
/// 16  capacity frames (u32)   48  zero timestamp host time (u64)
/// 20  channels (u32)          56  zero timestamp seed (u64)
/// ```
///
/// Indices are absolute frame counts; a frame at sample time `t` lives at
/// slot `t % capacity`. The driver only writes frames below the producer
/// index and the client only the ones the protocol gives it, so the two
/// sides never touch the same bytes while they follow the indices.
pub struct SharedRegion {
    mmap: MmapMut,
    base: *mut u8,
    direction: Direction,
    sample_format: SampleFormat,
    channels: u32,
    sample_rate: AtomicF64,
    capacity: u32,
    bytes_per_frame: usize,
    clients: AtomicUsize,
    teardown: AtomicBool,
}

// SAFETY: all mutation after construction goes through `base` with either
// atomics (header indices) or byte copies into disjoint ring slots.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    pub fn new(direction: Direction, format: StreamFormat, capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(DriverError::invalid_config("ring buffer needs at least one frame"));
        }
        format.validate()?;

        let bytes_per_frame = format.bytes_per_frame();
        let total_size = HEADER_SIZE + bytes_per_frame * capacity as usize;

        let mut mmap = MmapMut::map_anon(total_size)
            .map_err(|e| DriverError::internal(format!("failed to map {} byte region: {}", total_size, e)))?;

        // Write header
        mmap[0..8].copy_from_slice(REGION_MAGIC);
        mmap[8..12].copy_from_slice(&REGION_VERSION.to_le_bytes());
        mmap[OFFSET_BYTES_PER_FRAME..OFFSET_BYTES_PER_FRAME + 4]
            .copy_from_slice(&(bytes_per_frame as u32).to_le_bytes());
        mmap[OFFSET_CAPACITY..OFFSET_CAPACITY + 4].copy_from_slice(&capacity.to_le_bytes());
        mmap[OFFSET_CHANNELS..OFFSET_CHANNELS + 4].copy_from_slice(&format.channels.to_le_bytes());

        let base = mmap.as_mut_ptr();

        Ok(Self {
            mmap,
            base,
            direction,
            sample_format: format.sample_format,
            channels: format.channels,
            sample_rate: AtomicF64::new(format.sample_rate),
            capacity,
            bytes_per_frame,
            clients: AtomicUsize::new(0),
            teardown: AtomicBool::new(false),
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn format(&self) -> StreamFormat {
        StreamFormat::new(
            self.sample_rate.load(Ordering::Acquire),
            self.channels,
            self.sample_format,
        )
    }

    /// The rate does not change the layout, so a mapped region follows it in place.
    pub(crate) fn set_sample_rate(&self, sample_rate: f64) {
        self.sample_rate.store(sample_rate, Ordering::Release);
    }

    /// True when frames of `format` in a ring of `capacity` use this exact layout.
    pub fn fits(&self, format: StreamFormat, capacity: u32) -> bool {
        self.capacity == capacity
            && self.channels == format.channels
            && self.sample_format == format.sample_format
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// Total mapped size including the header.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn header(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        // SAFETY: the mapping is at least HEADER_SIZE bytes long.
        unsafe { std::ptr::copy_nonoverlapping(self.base, header.as_mut_ptr(), HEADER_SIZE) };
        header
    }

    fn header_word(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset % 8 == 0 && offset + 8 <= HEADER_SIZE);
        // SAFETY: the mapping is page aligned and `offset` is a multiple of 8
        // inside the header, so the word is aligned and in bounds.
        unsafe { &*(self.base.add(offset) as *const AtomicU64) }
    }

    pub fn producer_index(&self) -> u64 {
        self.header_word(OFFSET_PRODUCER).load(Ordering::Acquire)
    }

    pub fn set_producer_index(&self, index: u64) {
        self.header_word(OFFSET_PRODUCER).store(index, Ordering::Release);
    }

    pub fn consumer_index(&self) -> u64 {
        self.header_word(OFFSET_CONSUMER).load(Ordering::Acquire)
    }

    pub fn set_consumer_index(&self, index: u64) {
        self.header_word(OFFSET_CONSUMER).store(index, Ordering::Release);
    }

    /// Published by the IO thread each time the ring wraps.
    pub fn publish_zero_timestamp(&self, timestamp: ZeroTimestamp) {
        // Seed goes last: readers seeing the new seed see the new times.
        self.header_word(OFFSET_ZERO_SAMPLE).store(timestamp.sample_time, Ordering::Relaxed);
        self.header_word(OFFSET_ZERO_HOST).store(timestamp.host_time, Ordering::Relaxed);
        self.header_word(OFFSET_ZERO_SEED).store(timestamp.seed, Ordering::Release);
    }

    pub fn zero_timestamp(&self) -> ZeroTimestamp {
        let seed = self.header_word(OFFSET_ZERO_SEED).load(Ordering::Acquire);
        ZeroTimestamp {
            sample_time: self.header_word(OFFSET_ZERO_SAMPLE).load(Ordering::Relaxed),
            host_time: self.header_word(OFFSET_ZERO_HOST).load(Ordering::Relaxed),
            seed,
        }
    }

    /// Byte offset of the frame at `sample_time` and the frames left before the wrap.
    fn slot(&self, sample_time: u64) -> (usize, usize) {
        let frame = (sample_time % u64::from(self.capacity)) as usize;
        (
            HEADER_SIZE + frame * self.bytes_per_frame,
            self.capacity as usize - frame,
        )
    }

    /// Copies whole frames starting at `sample_time`, wrapping at the end of the ring.
    pub fn write_frames(&self, sample_time: u64, data: &[u8]) {
        let frames = (data.len() / self.bytes_per_frame).min(self.capacity as usize);
        let (offset, until_wrap) = self.slot(sample_time);
        let first = frames.min(until_wrap) * self.bytes_per_frame;
        let second = frames * self.bytes_per_frame - first;

        // SAFETY: both spans lie inside the data area: `offset + first` stops
        // at the end of the ring and `second` restarts at the header boundary.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(offset), first);
            if second > 0 {
                std::ptr::copy_nonoverlapping(data.as_ptr().add(first), self.base.add(HEADER_SIZE), second);
            }
        }
    }

    pub fn read_frames(&self, sample_time: u64, out: &mut [u8]) {
        let frames = (out.len() / self.bytes_per_frame).min(self.capacity as usize);
        let (offset, until_wrap) = self.slot(sample_time);
        let first = frames.min(until_wrap) * self.bytes_per_frame;
        let second = frames * self.bytes_per_frame - first;

        // SAFETY: same bounds as `write_frames`.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(offset), out.as_mut_ptr(), first);
            if second > 0 {
                std::ptr::copy_nonoverlapping(self.base.add(HEADER_SIZE), out.as_mut_ptr().add(first), second);
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }

    pub(crate) fn attach_client(&self) {
        self.clients.fetch_add(1, Ordering::AcqRel);
        self.teardown.store(false, Ordering::Release);
    }

    /// Returns true when the last client went away and a teardown was requested.
    pub(crate) fn detach_client(&self) -> bool {
        let previous = self
            .clients
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);

        if previous == 1 {
            self.teardown.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn teardown_pending(&self) -> bool {
        self.teardown.load(Ordering::Acquire)
    }

    /// Performed by the IO thread at a cycle boundary.
    pub(crate) fn complete_teardown(&self) -> bool {
        if self.teardown.swap(false, Ordering::AcqRel) {
            self.set_consumer_index(0);
            true
        } else {
            false
        }
    }
}

/// A client's view of a stream's shared region, returned by `map_buffer`.
#[derive(Clone)]
pub struct SharedRegionHandle {
    stream: crate::core::ObjectId,
    region: std::sync::Arc<SharedRegion>,
}

impl std::fmt::Debug for SharedRegionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegionHandle")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl SharedRegionHandle {
    pub(crate) fn new(stream: crate::core::ObjectId, region: std::sync::Arc<SharedRegion>) -> Self {
        Self { stream, region }
    }

    pub fn stream(&self) -> crate::core::ObjectId {
        self.stream
    }
}

impl std::ops::Deref for SharedRegionHandle {
    type Target = SharedRegion;

    fn deref(&self) -> &SharedRegion {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_i16() -> StreamFormat {
        StreamFormat::new(44100.0, 2, SampleFormat::I16)
    }

    #[test]
    fn test_header_layout() {
        let region = SharedRegion::new(Direction::Input, stereo_i16(), 256).unwrap();
        let header = region.header();

        assert_eq!(&header[0..8], REGION_MAGIC);
        assert_eq!(u32::from_le_bytes(header[8..12].try_into().unwrap()), REGION_VERSION);
        assert_eq!(u32::from_le_bytes(header[12..16].try_into().unwrap()), 4);
        assert_eq!(u32::from_le_bytes(header[16..20].try_into().unwrap()), 256);
        assert_eq!(u32::from_le_bytes(header[20..24].try_into().unwrap()), 2);
        assert_eq!(region.len(), HEADER_SIZE + 256 * 4);
    }

    #[test]
    fn test_write_wraps_around_the_ring() {
        let region = SharedRegion::new(Direction::Output, stereo_i16(), 8).unwrap();

        // 4 frames starting at frame 6: two at the end, two at the start
        let data: Vec<u8> = (0..16).collect();
        region.write_frames(6, &data);

        let mut tail = [0u8; 8];
        region.read_frames(6, &mut tail);
        assert_eq!(&tail, &data[..8]);

        let mut head = [0u8; 8];
        region.read_frames(8, &mut head);
        assert_eq!(&head, &data[8..]);

        let mut all = [0u8; 16];
        region.read_frames(14, &mut all);
        assert_eq!(&all, &data[..]);
    }

    #[test]
    fn test_indices_and_zero_timestamp() {
        let region = SharedRegion::new(Direction::Input, stereo_i16(), 64).unwrap();
        region.set_producer_index(512);
        region.set_consumer_index(256);
        region.publish_zero_timestamp(ZeroTimestamp { sample_time: 448, host_time: 99, seed: 3 });

        assert_eq!(region.producer_index(), 512);
        assert_eq!(region.consumer_index(), 256);
        assert_eq!(region.zero_timestamp().sample_time, 448);

        let header = region.header();
        assert_eq!(u64::from_le_bytes(header[24..32].try_into().unwrap()), 512);
    }

    #[test]
    fn test_last_client_requests_teardown() {
        let region = SharedRegion::new(Direction::Input, stereo_i16(), 64).unwrap();
        region.attach_client();
        region.attach_client();

        assert!(!region.detach_client());
        assert!(region.detach_client());
        assert!(region.teardown_pending());

        region.set_consumer_index(40);
        assert!(region.complete_teardown());
        assert!(!region.teardown_pending());
        assert_eq!(region.consumer_index(), 0);

        // Detaching with no clients is harmless
        assert!(!region.detach_client());
    }

    #[test]
    fn test_rate_change_keeps_layout() {
        let region = SharedRegion::new(Direction::Input, stereo_i16(), 64).unwrap();
        region.set_sample_rate(48000.0);

        assert_eq!(region.format(), StreamFormat::new(48000.0, 2, SampleFormat::I16));
        assert!(region.fits(StreamFormat::new(48000.0, 2, SampleFormat::I16), 64));
        assert!(!region.fits(StreamFormat::new(48000.0, 1, SampleFormat::I16), 64));
        assert!(!region.fits(StreamFormat::new(48000.0, 2, SampleFormat::F32), 64));
        assert!(!region.fits(stereo_i16(), 128));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = SharedRegion::new(Direction::Input, stereo_i16(), 0).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidConfig);
    }
}
