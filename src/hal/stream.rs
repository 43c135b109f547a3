use crate::buffers::SharedRegion;
use crate::core::{class_dispatch, ClassKind, DriverObject, ObjectCore, ObjectId, PropertyValue, Selector};
use crate::engine::IoState;
use crate::error::{DriverError, Result};
use crate::hal::device::DeviceShared;
use crate::hal::types::{Direction, SampleFormat, StreamFormat};
use crate::plugin::Host;
use simple_audio_macros::DriverClass;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

struct StreamInner {
    format: StreamFormat,
    region: Option<Arc<SharedRegion>>,
}

/// One direction of audio on a device, with its shared ring region
#[derive(DriverClass)]
#[driver_class(name = "Stream", kind = "Stream", class_id = "astr", base_class = "aobj")]
#[property(selector = "DIRECTION", get = "direction_value")]
#[property(selector = "STARTING_CHANNEL", get = "starting_channel_value")]
#[property(selector = "FORMAT", get = "format_value", set = "set_format_value")]
#[property(selector = "AVAILABLE_FORMATS", get = "available_formats_value")]
#[property(selector = "IS_ACTIVE", get = "is_active_value", set = "set_is_active_value")]
pub struct Stream {
    core: ObjectCore,
    direction: Direction,
    starting_channel: u32,
    device: Weak<DeviceShared>,
    active: Arc<AtomicBool>,
    inner: Mutex<StreamInner>,
    host: Arc<dyn Host>,
}

impl Stream {
    pub(crate) fn new(
        owner: ObjectId,
        direction: Direction,
        starting_channel: u32,
        format: StreamFormat,
        device: Weak<DeviceShared>,
        host: Arc<dyn Host>,
    ) -> Self {
        Self {
            core: ObjectCore::new(ClassKind::Stream, owner),
            direction,
            starting_channel,
            device,
            active: Arc::new(AtomicBool::new(true)),
            inner: Mutex::new(StreamInner { format, region: None }),
            host,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StreamInner>> {
        Ok(self.inner.lock()?)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn starting_channel(&self) -> u32 {
        self.starting_channel
    }

    pub fn format(&self) -> Result<StreamFormat> {
        Ok(self.lock()?.format)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Takes effect at the next IO cycle boundary.
    pub fn set_active(&self, active: bool) {
        if self.active.swap(active, Ordering::AcqRel) != active {
            self.host.properties_changed(self.id(), &[Selector::IS_ACTIVE]);
        }
    }

    pub(crate) fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    /// Changes the stream format. Only allowed while the owning device is stopped.
    pub fn set_format(&self, format: StreamFormat) -> Result<()> {
        let device = self
            .device
            .upgrade()
            .ok_or(DriverError::UnknownObject(self.core.owner()))?;

        // Device lock first: IO cannot start while the format changes.
        let state = device.lock()?;
        let io_state = device.io().state().load();
        if io_state != IoState::Stopped {
            return Err(DriverError::invalid_state(format!(
                "cannot change the format of stream {} while device IO is {}",
                self.id(),
                io_state.name()
            )));
        }

        format.validate()?;
        if format.sample_rate != state.timing().sample_rate {
            return Err(DriverError::invalid_config(format!(
                "stream sample rate {} does not match device rate {}",
                format.sample_rate,
                state.timing().sample_rate
            )));
        }

        {
            let mut inner = self.lock()?;
            let ring_frames = state.timing().ring_buffer_frame_size;
            self.check_mapped_layout(&inner, format, ring_frames)?;
            inner.format = format;
            if inner.region.as_ref().is_some_and(|r| !r.fits(format, ring_frames)) {
                inner.region = None;
            }
        }
        drop(state);

        tracing::debug!(stream = %self.id(), ?format, "stream format changed");
        self.host.properties_changed(self.id(), &[Selector::FORMAT]);
        Ok(())
    }

    /// Follows a device sample rate change. Caller holds the device lock.
    /// The region keeps its layout, so mapped clients stay on the data path.
    pub(crate) fn apply_sample_rate(&self, sample_rate: f64) -> Result<()> {
        let mut inner = self.lock()?;
        inner.format.sample_rate = sample_rate;
        if let Some(region) = &inner.region {
            region.set_sample_rate(sample_rate);
        }
        Ok(())
    }

    /// Rejects a ring size the mapped region cannot keep. Caller holds the device lock.
    pub(crate) fn check_ring_size(&self, ring_frames: u32) -> Result<()> {
        let inner = self.lock()?;
        self.check_mapped_layout(&inner, inner.format, ring_frames)
    }

    /// A region with clients is never replaced: they would keep a ring the
    /// IO thread no longer writes.
    fn check_mapped_layout(&self, inner: &StreamInner, format: StreamFormat, ring_frames: u32) -> Result<()> {
        match &inner.region {
            Some(region) if region.client_count() > 0 && !region.fits(format, ring_frames) => {
                Err(DriverError::invalid_state(format!(
                    "stream {} is mapped by {} client(s); its layout cannot change",
                    self.id(),
                    region.client_count()
                )))
            }
            _ => Ok(()),
        }
    }

    /// The stream's region for the current format and ring size, allocated
    /// on first use. Caller holds the device lock.
    pub(crate) fn region(&self, ring_frames: u32) -> Result<Arc<SharedRegion>> {
        let mut inner = self.lock()?;

        if let Some(region) = &inner.region {
            if region.fits(inner.format, ring_frames) {
                return Ok(region.clone());
            }
        }
        self.check_mapped_layout(&inner, inner.format, ring_frames)?;

        let region = Arc::new(SharedRegion::new(self.direction, inner.format, ring_frames)?);
        tracing::debug!(
            stream = %self.id(),
            bytes = region.len(),
            frames = ring_frames,
            "allocated shared region"
        );
        inner.region = Some(region.clone());
        Ok(region)
    }

    fn direction_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Direction(self.direction))
    }

    fn starting_channel_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U32(self.starting_channel))
    }

    fn format_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Format(self.format()?))
    }

    fn set_format_value(&self, value: PropertyValue) -> Result<()> {
        self.set_format(value.into_format()?)
    }

    /// Every supported rate and sample format at the stream's channel count.
    pub fn available_formats(&self) -> Result<Vec<StreamFormat>> {
        let device = self
            .device
            .upgrade()
            .ok_or(DriverError::UnknownObject(self.core.owner()))?;
        let channels = self.format()?.channels;

        Ok(device
            .settings()
            .supported_sample_rates
            .iter()
            .flat_map(|&rate| {
                SampleFormat::ALL
                    .into_iter()
                    .map(move |sample_format| StreamFormat::new(rate, channels, sample_format))
            })
            .collect())
    }

    fn available_formats_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Formats(self.available_formats()?))
    }

    fn is_active_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Bool(self.is_active()))
    }

    fn set_is_active_value(&self, value: PropertyValue) -> Result<()> {
        self.set_active(value.as_bool()?);
        Ok(())
    }
}

impl DriverObject for Stream {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    class_dispatch!();
}
