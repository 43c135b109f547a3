pub mod call;
pub mod host;

pub use call::{Call, Reply};
pub use host::{ChannelHost, Host, NullHost, PropertyChange};

use crate::config::DriverSettings;
use crate::core::{DriverObject, FourCc, ObjectId, ObjectMap, PropertyValue, Retained, Selector};
use crate::error::{DriverError, Result};
use crate::hal::device::Device;
use crate::hal::types::{DeviceConfig, Direction};
use crate::observability::{DeviceMonitor, MetricsCollector};
use crate::registry::registered_classes;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

pub const PLUGIN_CLASS: FourCc = FourCc::new(*b"aplg");
pub const PLUGIN_MANUFACTURER: &str = "SimpleAudio";

const PLUGIN_SELECTORS: [Selector; 8] = [
    Selector::CLASS,
    Selector::BASE_CLASS,
    Selector::OWNER,
    Selector::OBJECT_ID,
    Selector::OWNED_OBJECTS,
    Selector::MANUFACTURER,
    Selector::DEVICE_LIST,
    Selector::CLASS_LIST,
];

/// The plug-in entry point: device factory and the single dispatch surface
/// the host talks to.
///
/// Every call is resolved through the object map and runs inside a fault
/// boundary. A panic in a handler is reported as `InternalFault` and never
/// unwinds into the caller.
pub struct PlugIn {
    map: Arc<ObjectMap>,
    settings: Arc<DriverSettings>,
    host: Arc<dyn Host>,
    devices: Mutex<Vec<Retained<Device>>>,
    collector: Mutex<MetricsCollector>,
}

impl PlugIn {
    pub fn new(settings: DriverSettings) -> Self {
        Self::with_host(settings, Arc::new(NullHost))
    }

    pub fn with_host(settings: DriverSettings, host: Arc<dyn Host>) -> Self {
        Self {
            map: ObjectMap::new(),
            settings: Arc::new(settings),
            host,
            devices: Mutex::new(Vec::new()),
            collector: Mutex::new(MetricsCollector::new()),
        }
    }

    pub fn object_map(&self) -> &Arc<ObjectMap> {
        &self.map
    }

    pub fn settings(&self) -> &Arc<DriverSettings> {
        &self.settings
    }

    fn devices(&self) -> MutexGuard<'_, Vec<Retained<Device>>> {
        self.devices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics(&self) -> MutexGuard<'_, MetricsCollector> {
        self.collector.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Validates `config`, then creates and registers a device with one
    /// stream per direction that has channels.
    pub fn create_device(&self, config: &DeviceConfig) -> Result<ObjectId> {
        self.settings.validate_device(config)?;

        let device = Device::new(config, self.settings.clone(), self.host.clone());
        let id = self.map.register(device.clone())?;
        let device = Retained::new(device);

        let populate = || -> Result<()> {
            for direction in [Direction::Input, Direction::Output] {
                if config.channels(direction) > 0 {
                    device.add_stream(direction)?;
                }
            }
            Ok(())
        };
        if let Err(e) = populate() {
            tracing::warn!(device = %id, error = %e, "device setup failed, discarding");
            self.map.retire(id)?;
            return Err(e);
        }

        self.metrics().register(id, device.metrics());
        self.devices().push(device);

        tracing::info!(
            device = %id,
            name = %config.name,
            sample_rate = config.sample_rate,
            buffer_frames = config.buffer_frame_size,
            "created device"
        );
        self.host
            .properties_changed(ObjectId::PLUGIN, &[Selector::DEVICE_LIST, Selector::OWNED_OBJECTS]);
        Ok(id)
    }

    /// Stops the device's IO and retires it together with its streams and
    /// controls. Handles held elsewhere keep the memory alive, but the IDs
    /// stop resolving immediately.
    pub fn destroy_device(&self, id: ObjectId) -> Result<()> {
        let device = {
            let mut devices = self.devices();
            let index = devices
                .iter()
                .position(|d| d.id() == id)
                .ok_or(DriverError::UnknownObject(id))?;
            devices.remove(index)
        };

        if let Err(e) = device.stop() {
            tracing::warn!(device = %id, error = %e, "IO did not stop cleanly during destroy");
        }
        self.map.retire(id)?;
        self.metrics().unregister(id);
        drop(device);

        tracing::info!(device = %id, "destroyed device");
        self.host
            .properties_changed(ObjectId::PLUGIN, &[Selector::DEVICE_LIST, Selector::OWNED_OBJECTS]);
        Ok(())
    }

    pub fn device_ids(&self) -> Vec<ObjectId> {
        self.devices().iter().map(|d| d.id()).collect()
    }

    pub fn device(&self, id: ObjectId) -> Result<Retained<Device>> {
        self.map.lookup_as::<Device>(id)
    }

    /// Routes `call` to object `id` inside the fault boundary.
    pub fn dispatch(&self, id: ObjectId, call: Call) -> Result<Reply> {
        let name = call.name();

        match catch_unwind(AssertUnwindSafe(|| self.route(id, call))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(object = %id, call = name, panic = %message, "handler faulted");
                Err(DriverError::internal(format!("{} on object {} faulted: {}", name, id, message)))
            }
        }
    }

    /// Opaque blob entry point: empty `args` reads the property, otherwise
    /// `args` is a JSON `PropertyValue` to write. The result is JSON.
    pub fn dispatch_raw(&self, object: u32, selector: u32, args: &[u8]) -> Result<Vec<u8>> {
        let id = ObjectId::new(object);
        let selector = Selector::from_raw(selector);

        if args.is_empty() {
            let value = self.dispatch(id, Call::GetProperty(selector))?.into_value()?;
            Ok(serde_json::to_vec(&value)?)
        } else {
            let value: PropertyValue = serde_json::from_slice(args)?;
            self.dispatch(id, Call::SetProperty(selector, value))?;
            Ok(serde_json::to_vec(&())?)
        }
    }

    fn route(&self, id: ObjectId, call: Call) -> Result<Reply> {
        if id == ObjectId::PLUGIN {
            return self.plugin_call(call);
        }

        let object = self.map.lookup(id)?;
        tracing::trace!(object = %id, call = call.name(), "dispatch");

        match call {
            Call::HasProperty(selector) => Ok(Reply::Bool(object.has_property(selector))),
            Call::IsPropertySettable(selector) => {
                Ok(Reply::Bool(object.is_property_settable(selector)?))
            }
            Call::GetProperty(selector) => Ok(Reply::Value(object.get_property(selector)?)),
            Call::SetProperty(selector, value) => {
                object.set_property(selector, value)?;
                Ok(Reply::Done)
            }
            Call::StartIo => {
                as_device(&object, "StartIo")?.start()?;
                Ok(Reply::Done)
            }
            Call::StopIo => {
                as_device(&object, "StopIo")?.stop()?;
                Ok(Reply::Done)
            }
            Call::AddStream(direction) => {
                let stream = as_device(&object, "AddStream")?.add_stream(direction)?;
                Ok(Reply::Object(stream))
            }
            Call::ZeroTimestamp => Ok(Reply::Timestamp(
                as_device(&object, "ZeroTimestamp")?.zero_timestamp()?,
            )),
            Call::IoCycle { host_time } => Ok(Reply::SampleTime(
                as_device(&object, "IoCycle")?.io_cycle(host_time)?,
            )),
        }
    }

    fn plugin_call(&self, call: Call) -> Result<Reply> {
        match call {
            Call::HasProperty(selector) => Ok(Reply::Bool(PLUGIN_SELECTORS.contains(&selector))),
            Call::IsPropertySettable(selector) if PLUGIN_SELECTORS.contains(&selector) => {
                Ok(Reply::Bool(false))
            }
            Call::GetProperty(selector) => Ok(Reply::Value(self.plugin_property(selector)?)),
            Call::SetProperty(selector, _) if PLUGIN_SELECTORS.contains(&selector) => {
                Err(DriverError::NotWritable {
                    object: ObjectId::PLUGIN,
                    selector,
                })
            }
            Call::IsPropertySettable(selector) | Call::SetProperty(selector, _) => {
                Err(plugin_unsupported(selector))
            }
            other => Err(DriverError::invalid_argument(format!(
                "{} is not a plug-in call",
                other.name()
            ))),
        }
    }

    fn plugin_property(&self, selector: Selector) -> Result<PropertyValue> {
        match selector {
            Selector::CLASS => Ok(PropertyValue::ClassId(PLUGIN_CLASS)),
            Selector::BASE_CLASS => Ok(PropertyValue::ClassId(FourCc::new(*b"aobj"))),
            Selector::OWNER => Ok(PropertyValue::Object(ObjectId::UNKNOWN)),
            Selector::OBJECT_ID => Ok(PropertyValue::Object(ObjectId::PLUGIN)),
            Selector::MANUFACTURER => Ok(PropertyValue::Text(PLUGIN_MANUFACTURER.to_string())),
            Selector::DEVICE_LIST | Selector::OWNED_OBJECTS => {
                Ok(PropertyValue::Objects(self.device_ids()))
            }
            Selector::CLASS_LIST => Ok(PropertyValue::Classes(
                registered_classes().into_iter().map(|c| c.class_id).collect(),
            )),
            other => Err(plugin_unsupported(other)),
        }
    }

    pub fn collector(&self) -> MetricsCollector {
        self.metrics().clone()
    }

    pub fn metrics_report(&self) -> String {
        DeviceMonitor::new(self.collector()).generate_report()
    }

    /// Destroys every device. Failures are logged and do not stop the sweep.
    pub fn shutdown(&self) {
        for id in self.device_ids() {
            if let Err(e) = self.destroy_device(id) {
                tracing::warn!(device = %id, error = %e, "failed to destroy device at shutdown");
            }
        }
        tracing::debug!(remaining = self.map.len(), "plug-in shut down");
    }
}

impl Drop for PlugIn {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn as_device<'a>(object: &'a Retained<dyn DriverObject>, call: &str) -> Result<&'a Device> {
    object.as_any().downcast_ref::<Device>().ok_or_else(|| {
        DriverError::invalid_argument(format!(
            "{} needs a device, object {} is a {}",
            call,
            object.id(),
            object.class().name
        ))
    })
}

fn plugin_unsupported(selector: Selector) -> DriverError {
    DriverError::UnsupportedProperty {
        object: ObjectId::PLUGIN,
        class: "PlugIn",
        selector,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{class_dispatch, ClassKind, ObjectCore};
    use crate::ErrorKind;
    use simple_audio_macros::DriverClass;

    #[derive(DriverClass)]
    #[driver_class(name = "Faulty", kind = "Control", class_id = "falt")]
    #[property(selector = "NAME", get = "name_value")]
    struct Faulty {
        core: ObjectCore,
    }

    impl Faulty {
        fn name_value(&self) -> Result<PropertyValue> {
            panic!("name table corrupted")
        }
    }

    impl DriverObject for Faulty {
        fn core(&self) -> &ObjectCore {
            &self.core
        }

        class_dispatch!();
    }

    #[test]
    fn test_fault_becomes_internal_fault() {
        let plugin = PlugIn::new(DriverSettings::default());
        let faulty = Arc::new(Faulty {
            core: ObjectCore::new(ClassKind::Control, ObjectId::PLUGIN),
        });
        let id = plugin.object_map().register(faulty).unwrap();

        let err = plugin.dispatch(id, Call::GetProperty(Selector::NAME)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalFault);
        assert!(err.to_string().contains("name table corrupted"));

        // The boundary is still usable afterwards
        let reply = plugin.dispatch(id, Call::HasProperty(Selector::NAME)).unwrap();
        assert_eq!(reply, Reply::Bool(true));
    }

    #[test]
    fn test_plugin_object_properties() {
        let plugin = PlugIn::new(DriverSettings::default());
        let device = plugin.create_device(&DeviceConfig::default()).unwrap();

        let class = plugin
            .dispatch(ObjectId::PLUGIN, Call::GetProperty(Selector::CLASS))
            .unwrap();
        assert_eq!(class, Reply::Value(PropertyValue::ClassId(PLUGIN_CLASS)));

        let devices = plugin
            .dispatch(ObjectId::PLUGIN, Call::GetProperty(Selector::DEVICE_LIST))
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(devices, PropertyValue::Objects(vec![device]));

        let err = plugin
            .dispatch(ObjectId::PLUGIN, Call::SetProperty(Selector::DEVICE_LIST, PropertyValue::U32(0)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotWritable);

        let err = plugin.dispatch(ObjectId::PLUGIN, Call::StartIo).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_device_call_on_stream_is_rejected() {
        let plugin = PlugIn::new(DriverSettings::default());
        let device = plugin.create_device(&DeviceConfig::default()).unwrap();
        let stream = plugin.device(device).unwrap().stream_ids().unwrap()[0];

        let err = plugin.dispatch(stream, Call::StartIo).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_dispatch_raw_get_and_set() {
        let plugin = PlugIn::new(DriverSettings::default());
        let device = plugin.create_device(&DeviceConfig::default()).unwrap();

        let args = serde_json::to_vec(&PropertyValue::Text("Renamed".into())).unwrap();
        plugin
            .dispatch_raw(device.raw(), Selector::NAME.raw(), &args)
            .unwrap();

        let out = plugin.dispatch_raw(device.raw(), Selector::NAME.raw(), &[]).unwrap();
        let value: PropertyValue = serde_json::from_slice(&out).unwrap();
        assert_eq!(value, PropertyValue::Text("Renamed".into()));

        let err = plugin
            .dispatch_raw(device.raw(), Selector::NAME.raw(), b"{not json")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_create_device_notifies_host() {
        let (host, rx) = ChannelHost::new();
        let plugin = PlugIn::with_host(DriverSettings::default(), Arc::new(host));
        plugin.create_device(&DeviceConfig::default()).unwrap();

        let changes: Vec<_> = rx.try_iter().collect();
        assert!(changes
            .iter()
            .any(|c| c.object == ObjectId::PLUGIN && c.selectors.contains(&Selector::DEVICE_LIST)));
    }
}
