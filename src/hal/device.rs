use crate::buffers::SharedRegion;
use crate::config::DriverSettings;
use crate::core::{class_dispatch, ClassKind, DriverObject, ObjectCore, ObjectId, PropertyValue, Retained, Selector};
use crate::engine::io_thread::{IoContext, StreamSlot};
use crate::engine::{host_time_now, IoShared, IoState, IoThread, ZeroTimestamp};
use crate::error::{DriverError, Result};
use crate::hal::control::{MuteControl, VolumeControl};
use crate::hal::stream::Stream;
use crate::hal::types::{DeviceConfig, Direction, SampleFormat, StreamFormat};
use crate::observability::DeviceMetrics;
use crate::plugin::Host;
use simple_audio_macros::DriverClass;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// IO timing parameters. Immutable while the device is not `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoTiming {
    pub sample_rate: f64,
    pub buffer_frame_size: u32,
    pub ring_buffer_frame_size: u32,
    pub latency: u32,
    pub safety_offset: u32,
}

struct ControlEntry {
    scope: Direction,
    object: Retained<dyn DriverObject>,
}

pub(crate) struct DeviceState {
    name: String,
    manufacturer: String,
    timing: IoTiming,
    default_channels: [u32; 2],
    streams: Vec<Retained<Stream>>,
    controls: Vec<ControlEntry>,
    io_thread: Option<IoThread>,
}

impl DeviceState {
    pub(crate) fn timing(&self) -> IoTiming {
        self.timing
    }

    fn channels(&self, direction: Direction) -> u32 {
        self.streams
            .iter()
            .filter(|s| s.direction() == direction)
            .filter_map(|s| s.format().ok())
            .map(|f| f.channels)
            .sum()
    }
}

/// The part of a device its streams point back to.
pub(crate) struct DeviceShared {
    state: Mutex<DeviceState>,
    io: Arc<IoShared>,
    settings: Arc<DriverSettings>,
    host: Arc<dyn Host>,
}

impl DeviceShared {
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, DeviceState>> {
        Ok(self.state.lock()?)
    }

    pub(crate) fn io(&self) -> &Arc<IoShared> {
        &self.io
    }

    pub(crate) fn settings(&self) -> &DriverSettings {
        &self.settings
    }
}

const IO_STATE_SELECTORS: [Selector; 2] = [Selector::IO_STATE, Selector::IS_RUNNING];

/// A simulated audio device: streams, controls and an IO thread
#[derive(DriverClass)]
#[driver_class(name = "Device", kind = "Device", class_id = "adev", base_class = "aobj")]
#[property(selector = "NAME", get = "name_value", set = "set_name_value")]
#[property(selector = "MANUFACTURER", get = "manufacturer_value")]
#[property(selector = "DEVICE_UID", get = "uid_value")]
#[property(selector = "NOMINAL_SAMPLE_RATE", get = "sample_rate_value", set = "set_sample_rate_value")]
#[property(selector = "AVAILABLE_SAMPLE_RATES", get = "available_sample_rates_value")]
#[property(selector = "BUFFER_FRAME_SIZE", get = "buffer_frame_size_value", set = "set_buffer_frame_size_value")]
#[property(selector = "RING_BUFFER_FRAME_SIZE", get = "ring_size_value", set = "set_ring_size_value")]
#[property(selector = "LATENCY", get = "latency_value", set = "set_latency_value")]
#[property(selector = "SAFETY_OFFSET", get = "safety_offset_value", set = "set_safety_offset_value")]
#[property(selector = "IO_STATE", get = "io_state_value")]
#[property(selector = "IS_RUNNING", get = "is_running_value")]
#[property(selector = "STREAMS", get = "streams_value")]
#[property(selector = "CONTROLS", get = "controls_value")]
#[property(selector = "OWNED_OBJECTS", get = "owned_objects_value")]
#[property(selector = "INPUT_CHANNELS", get = "input_channels_value")]
#[property(selector = "OUTPUT_CHANNELS", get = "output_channels_value")]
#[property(selector = "ZERO_TIMESTAMP_PERIOD", get = "ring_size_value")]
#[property(selector = "DROPPED_CYCLES", get = "dropped_cycles_value")]
#[property(selector = "IO_CYCLES", get = "io_cycles_value")]
#[property(selector = "IS_ALIVE", get = "is_alive_value")]
#[property(selector = "IS_HIDDEN", get = "is_hidden_value")]
#[property(selector = "CAN_BE_DEFAULT", get = "can_be_default_value")]
#[property(selector = "CAN_BE_SYSTEM_DEFAULT", get = "can_be_default_value")]
#[property(selector = "PREFERRED_STEREO_CHANNELS", get = "preferred_stereo_channels_value")]
pub struct Device {
    core: ObjectCore,
    shared: Arc<DeviceShared>,
}

impl Device {
    /// Builds an unregistered device. Streams can be added once it is in a map.
    pub fn new(config: &DeviceConfig, settings: Arc<DriverSettings>, host: Arc<dyn Host>) -> Arc<Self> {
        let metrics = Arc::new(DeviceMetrics::new(config.name.clone()));
        let state = DeviceState {
            name: config.name.clone(),
            manufacturer: config.manufacturer.clone(),
            timing: IoTiming {
                sample_rate: config.sample_rate,
                buffer_frame_size: config.buffer_frame_size,
                ring_buffer_frame_size: config.ring_buffer_frame_size,
                latency: config.latency,
                safety_offset: config.safety_offset,
            },
            default_channels: [config.input_channels.max(1), config.output_channels.max(1)],
            streams: Vec::new(),
            controls: Vec::new(),
            io_thread: None,
        };

        Arc::new(Self {
            core: ObjectCore::new(ClassKind::Device, ObjectId::PLUGIN),
            shared: Arc::new(DeviceShared {
                state: Mutex::new(state),
                io: Arc::new(IoShared::new(metrics)),
                settings,
                host,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeviceState>> {
        self.shared.lock()
    }

    fn notify(&self, selectors: &[Selector]) {
        self.shared.host.properties_changed(self.id(), selectors);
    }

    pub fn io_state(&self) -> IoState {
        self.shared.io.state().load()
    }

    pub fn metrics(&self) -> Arc<DeviceMetrics> {
        self.shared.io.metrics().clone()
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.lock()?.name.clone())
    }

    pub fn uid(&self) -> String {
        format!("SimpleAudioDevice:{}", self.id().raw())
    }

    pub fn timing(&self) -> Result<IoTiming> {
        Ok(self.lock()?.timing)
    }

    pub fn stream_ids(&self) -> Result<Vec<ObjectId>> {
        Ok(self.lock()?.streams.iter().map(|s| s.id()).collect())
    }

    pub fn control_ids(&self) -> Result<Vec<ObjectId>> {
        Ok(self.lock()?.controls.iter().map(|c| c.object.id()).collect())
    }

    /// Appends a stream using the device's rate and its default channel count.
    pub fn add_stream(&self, direction: Direction) -> Result<ObjectId> {
        let format = {
            let state = self.lock()?;
            let channels = match direction {
                Direction::Input => state.default_channels[0],
                Direction::Output => state.default_channels[1],
            };
            StreamFormat::new(state.timing.sample_rate, channels, SampleFormat::default())
        };
        self.add_stream_with_format(direction, format)
    }

    /// Appends a stream. Only allowed while IO is stopped.
    pub fn add_stream_with_format(&self, direction: Direction, format: StreamFormat) -> Result<ObjectId> {
        let map = self
            .core
            .map()
            .ok_or_else(|| DriverError::internal(format!("device {} is not registered", self.id())))?;

        let mut state = self.lock()?;
        let io_state = self.io_state();
        if io_state != IoState::Stopped {
            return Err(DriverError::invalid_state(format!(
                "cannot add a stream to device {} while IO is {}",
                self.id(),
                io_state.name()
            )));
        }

        format.validate()?;
        if format.sample_rate != state.timing.sample_rate {
            return Err(DriverError::invalid_config(format!(
                "stream sample rate {} does not match device rate {}",
                format.sample_rate, state.timing.sample_rate
            )));
        }

        let starting_channel = 1 + state.channels(direction);
        let stream = Arc::new(Stream::new(
            self.id(),
            direction,
            starting_channel,
            format,
            Arc::downgrade(&self.shared),
            self.shared.host.clone(),
        ));
        let stream_id = map.register(stream.clone())?;
        state.streams.push(Retained::new(stream));

        if !state.controls.iter().any(|c| c.scope == direction) {
            let volume = Arc::new(VolumeControl::new(
                self.id(),
                direction,
                self.shared.io.clone(),
                self.shared.host.clone(),
            ));
            map.register(volume.clone())?;
            state.controls.push(ControlEntry {
                scope: direction,
                object: Retained::new(volume as Arc<dyn DriverObject>),
            });

            let mute = Arc::new(MuteControl::new(
                self.id(),
                direction,
                self.shared.io.clone(),
                self.shared.host.clone(),
            ));
            map.register(mute.clone())?;
            state.controls.push(ControlEntry {
                scope: direction,
                object: Retained::new(mute as Arc<dyn DriverObject>),
            });
        }
        drop(state);

        tracing::debug!(device = %self.id(), stream = %stream_id, ?direction, "added stream");
        self.notify(&[
            Selector::STREAMS,
            Selector::CONTROLS,
            Selector::OWNED_OBJECTS,
            Selector::INPUT_CHANNELS,
            Selector::OUTPUT_CHANNELS,
        ]);
        Ok(stream_id)
    }

    /// `Stopped -> Starting -> Running`. Rejected from any other state.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock()?;
        let io = &self.shared.io;

        io.state().transition(IoState::Starting).map_err(|current| {
            DriverError::invalid_state(format!(
                "cannot start IO on device {} while it is {}",
                self.id(),
                current.name()
            ))
        })?;

        match self.spawn_io(&state) {
            Ok(thread) => {
                state.io_thread = Some(thread);
                io.state().force(IoState::Running);
            }
            Err(e) => {
                io.state().force(IoState::Stopped);
                tracing::error!(device = %self.id(), error = %e, "failed to start IO");
                return Err(e);
            }
        }
        let timing = state.timing;
        drop(state);

        tracing::info!(
            device = %self.id(),
            sample_rate = timing.sample_rate,
            buffer_frames = timing.buffer_frame_size,
            "IO started"
        );
        self.notify(&IO_STATE_SELECTORS);
        Ok(())
    }

    fn spawn_io(&self, state: &DeviceState) -> Result<IoThread> {
        let timing = state.timing;
        let slots = state
            .streams
            .iter()
            .map(|stream| {
                let region = stream.region(timing.ring_buffer_frame_size)?;
                Ok(StreamSlot {
                    id: stream.id(),
                    direction: stream.direction(),
                    format: region.format().sample_format,
                    region,
                    active: stream.active_flag(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let io = &self.shared.io;
        let epoch = io.begin_run();
        io.clock().anchor(
            host_time_now(),
            timing.sample_rate,
            timing.ring_buffer_frame_size,
            epoch,
        );

        let ctx = IoContext::new(
            self.id(),
            timing.buffer_frame_size,
            timing.ring_buffer_frame_size,
            timing.sample_rate,
            slots,
        );

        IoThread::spawn(ctx, io.clone(), epoch).map_err(|e| {
            io.fence();
            e
        })
    }

    /// Drains the IO thread and returns to `Stopped`.
    ///
    /// The wait is bounded by the drain timeout. If the thread does not
    /// leave its loop in time the device is forced to `Stopped` anyway and
    /// `DrainTimeout` is returned. Stopping a stopped device is a no-op.
    pub fn stop(&self) -> Result<()> {
        let io = &self.shared.io;
        let thread = {
            let mut state = self.lock()?;
            match io.state().load() {
                IoState::Stopped | IoState::Stopping => return Ok(()),
                IoState::Starting | IoState::Running => {}
            }
            io.state().force(IoState::Stopping);
            state.io_thread.take()
        };

        let timeout = self.shared.settings.drain_timeout();
        let drained = match thread {
            Some(thread) => {
                thread.request_stop(io);
                thread.drain(timeout)
            }
            None => true,
        };

        let result = if drained {
            tracing::info!(
                device = %self.id(),
                region_teardowns = io.metrics().teardowns(),
                "IO stopped"
            );
            Ok(())
        } else {
            io.fence();
            io.metrics().record_drain_timeout();
            tracing::warn!(
                device = %self.id(),
                timeout_ms = timeout.as_millis() as u64,
                "IO thread did not drain in time, forcing stop"
            );
            Err(DriverError::DrainTimeout {
                device: self.id(),
                timeout_ms: timeout.as_millis() as u64,
            })
        };

        io.state().force(IoState::Stopped);
        self.notify(&IO_STATE_SELECTORS);
        result
    }

    /// Maps a host time to device sample time. Lock-free and allocation-free
    /// while running.
    pub fn io_cycle(&self, host_time: u64) -> Result<u64> {
        let io = &self.shared.io;
        if io.state().load() != IoState::Running {
            return Err(DriverError::invalid_state(format!(
                "device {} is not running",
                self.id()
            )));
        }
        Ok(io.clock().sample_time_at(host_time))
    }

    pub fn zero_timestamp(&self) -> Result<ZeroTimestamp> {
        let io = &self.shared.io;
        if io.state().load() != IoState::Running {
            return Err(DriverError::invalid_state(format!(
                "device {} has no timeline while IO is {}",
                self.id(),
                io.state().load().name()
            )));
        }
        Ok(io.clock().zero_timestamp_at(host_time_now()))
    }

    /// The shared region of one of this device's streams.
    pub fn shared_region(&self, stream: ObjectId) -> Result<Arc<SharedRegion>> {
        let state = self.lock()?;
        let found = state
            .streams
            .iter()
            .find(|s| s.id() == stream)
            .ok_or(DriverError::UnknownObject(stream))?;
        found.region(state.timing.ring_buffer_frame_size)
    }

    /// Like `shared_region`, but counts the caller as a client before the
    /// device lock is released, so no layout change can slip in between.
    pub(crate) fn attach_region(&self, stream: ObjectId) -> Result<Arc<SharedRegion>> {
        let state = self.lock()?;
        let found = state
            .streams
            .iter()
            .find(|s| s.id() == stream)
            .ok_or(DriverError::UnknownObject(stream))?;
        let region = found.region(state.timing.ring_buffer_frame_size)?;
        region.attach_client();
        Ok(region)
    }

    /// Stalls the IO thread once at its next wake-up, simulating a hung cycle.
    pub fn inject_io_stall(&self, duration: Duration) {
        self.shared.io.inject_stall(duration);
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DriverError::invalid_argument("device name must not be empty"));
        }
        self.lock()?.name = name;
        self.notify(&[Selector::NAME]);
        Ok(())
    }

    /// Applies a timing change under the device lock, only while stopped.
    fn change_timing(
        &self,
        selector: Selector,
        apply: impl FnOnce(&mut DeviceState, &DriverSettings) -> Result<()>,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let io_state = self.io_state();
        if io_state != IoState::Stopped {
            return Err(DriverError::invalid_state(format!(
                "cannot change {} of device {} while IO is {}",
                selector,
                self.id(),
                io_state.name()
            )));
        }
        apply(&mut state, &self.shared.settings)?;
        drop(state);

        self.notify(&[selector]);
        Ok(())
    }

    pub fn set_sample_rate(&self, sample_rate: f64) -> Result<()> {
        self.change_timing(Selector::NOMINAL_SAMPLE_RATE, |state, settings| {
            settings.check_sample_rate(sample_rate)?;
            state.timing.sample_rate = sample_rate;
            for stream in state.streams.iter() {
                stream.apply_sample_rate(sample_rate)?;
            }
            Ok(())
        })
    }

    pub fn set_buffer_frame_size(&self, frames: u32) -> Result<()> {
        self.change_timing(Selector::BUFFER_FRAME_SIZE, |state, settings| {
            settings.check_buffer_frame_size(frames)?;
            settings.check_ring_size(state.timing.ring_buffer_frame_size, frames)?;
            state.timing.buffer_frame_size = frames;
            Ok(())
        })
    }

    pub fn set_ring_buffer_frame_size(&self, frames: u32) -> Result<()> {
        self.change_timing(Selector::RING_BUFFER_FRAME_SIZE, |state, settings| {
            settings.check_ring_size(frames, state.timing.buffer_frame_size)?;
            for stream in state.streams.iter() {
                stream.check_ring_size(frames)?;
            }
            state.timing.ring_buffer_frame_size = frames;
            Ok(())
        })
    }

    pub fn set_latency(&self, frames: u32) -> Result<()> {
        self.change_timing(Selector::LATENCY, |state, _| {
            state.timing.latency = frames;
            Ok(())
        })
    }

    pub fn set_safety_offset(&self, frames: u32) -> Result<()> {
        self.change_timing(Selector::SAFETY_OFFSET, |state, _| {
            state.timing.safety_offset = frames;
            Ok(())
        })
    }

    fn name_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Text(self.name()?))
    }

    fn set_name_value(&self, value: PropertyValue) -> Result<()> {
        self.set_name(value.into_text()?)
    }

    fn manufacturer_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Text(self.lock()?.manufacturer.clone()))
    }

    fn uid_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Text(self.uid()))
    }

    fn sample_rate_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::F64(self.timing()?.sample_rate))
    }

    fn set_sample_rate_value(&self, value: PropertyValue) -> Result<()> {
        self.set_sample_rate(value.as_f64()?)
    }

    fn available_sample_rates_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Rates(self.shared.settings.supported_sample_rates.clone()))
    }

    fn buffer_frame_size_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U32(self.timing()?.buffer_frame_size))
    }

    fn set_buffer_frame_size_value(&self, value: PropertyValue) -> Result<()> {
        self.set_buffer_frame_size(value.as_u32()?)
    }

    fn ring_size_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U32(self.timing()?.ring_buffer_frame_size))
    }

    fn set_ring_size_value(&self, value: PropertyValue) -> Result<()> {
        self.set_ring_buffer_frame_size(value.as_u32()?)
    }

    fn latency_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U32(self.timing()?.latency))
    }

    fn set_latency_value(&self, value: PropertyValue) -> Result<()> {
        self.set_latency(value.as_u32()?)
    }

    fn safety_offset_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U32(self.timing()?.safety_offset))
    }

    fn set_safety_offset_value(&self, value: PropertyValue) -> Result<()> {
        self.set_safety_offset(value.as_u32()?)
    }

    fn io_state_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::IoState(self.io_state()))
    }

    fn is_running_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Bool(self.io_state() == IoState::Running))
    }

    fn streams_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Objects(self.stream_ids()?))
    }

    fn controls_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Objects(self.control_ids()?))
    }

    fn owned_objects_value(&self) -> Result<PropertyValue> {
        let state = self.lock()?;
        let owned = state
            .streams
            .iter()
            .map(|s| s.id())
            .chain(state.controls.iter().map(|c| c.object.id()))
            .collect();
        Ok(PropertyValue::Objects(owned))
    }

    fn input_channels_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U32(self.lock()?.channels(Direction::Input)))
    }

    fn output_channels_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U32(self.lock()?.channels(Direction::Output)))
    }

    fn dropped_cycles_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U64(self.shared.io.metrics().dropped_cycles()))
    }

    fn io_cycles_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::U64(self.shared.io.metrics().cycles()))
    }

    fn is_alive_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Bool(self.core.is_active()))
    }

    fn is_hidden_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Bool(false))
    }

    fn can_be_default_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Bool(true))
    }

    fn preferred_stereo_channels_value(&self) -> Result<PropertyValue> {
        Ok(PropertyValue::Channels(vec![1, 2]))
    }
}

impl DriverObject for Device {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    class_dispatch!();

    fn finalize(&self) {
        if let Err(e) = self.stop() {
            tracing::warn!(device = %self.id(), error = %e, "stop during finalize failed");
        }

        let (streams, controls) = {
            let mut state = self
                .shared
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            (
                std::mem::take(&mut state.streams),
                std::mem::take(&mut state.controls),
            )
        };

        if let Some(map) = self.core.map() {
            for id in streams
                .iter()
                .map(|s| s.id())
                .chain(controls.iter().map(|c| c.object.id()))
            {
                if let Err(e) = map.retire(id) {
                    tracing::debug!(object = %id, error = %e, "child already gone");
                }
            }
        }

        tracing::debug!(
            device = %self.id(),
            streams = streams.len(),
            controls = controls.len(),
            "device finalized"
        );
    }
}
