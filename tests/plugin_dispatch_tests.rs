use simple_audio::config::DriverSettings;
use simple_audio::core::{FourCc, ObjectId, PropertyValue, Selector};
use simple_audio::hal::{DeviceConfig, Direction};
use simple_audio::plugin::{Call, ChannelHost, PlugIn, Reply};
use simple_audio::ErrorKind;
use std::sync::Arc;

fn get(plugin: &PlugIn, id: ObjectId, selector: Selector) -> PropertyValue {
    plugin
        .dispatch(id, Call::GetProperty(selector))
        .unwrap()
        .into_value()
        .unwrap()
}

#[test]
fn test_dispatch_to_unknown_ids() {
    let plugin = PlugIn::new(DriverSettings::default());

    for raw in [0u32, 2, 31, 32, 1000, u32::MAX] {
        let err = plugin
            .dispatch(ObjectId::new(raw), Call::GetProperty(Selector::NAME))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownObject, "id {}", raw);
    }
}

#[test]
fn test_create_device_round_trips_config() {
    let plugin = PlugIn::new(DriverSettings::default());
    let config = DeviceConfig {
        name: "Loopback Bench".to_string(),
        manufacturer: "Acme".to_string(),
        sample_rate: 48000.0,
        buffer_frame_size: 256,
        ring_buffer_frame_size: 4096,
        latency: 24,
        safety_offset: 12,
        input_channels: 4,
        output_channels: 6,
    };
    let id = plugin.create_device(&config).unwrap();

    assert_eq!(get(&plugin, id, Selector::NAME), PropertyValue::Text(config.name.clone()));
    assert_eq!(get(&plugin, id, Selector::MANUFACTURER), PropertyValue::Text(config.manufacturer.clone()));
    assert_eq!(get(&plugin, id, Selector::NOMINAL_SAMPLE_RATE), PropertyValue::F64(48000.0));
    assert_eq!(get(&plugin, id, Selector::BUFFER_FRAME_SIZE), PropertyValue::U32(256));
    assert_eq!(get(&plugin, id, Selector::RING_BUFFER_FRAME_SIZE), PropertyValue::U32(4096));
    assert_eq!(get(&plugin, id, Selector::LATENCY), PropertyValue::U32(24));
    assert_eq!(get(&plugin, id, Selector::SAFETY_OFFSET), PropertyValue::U32(12));
    assert_eq!(get(&plugin, id, Selector::INPUT_CHANNELS), PropertyValue::U32(4));
    assert_eq!(get(&plugin, id, Selector::OUTPUT_CHANNELS), PropertyValue::U32(6));
}

#[test]
fn test_create_device_rejects_bad_configs() {
    let plugin = PlugIn::new(DriverSettings::default());

    for config in [
        DeviceConfig { sample_rate: 0.0, ..DeviceConfig::default() },
        DeviceConfig { sample_rate: f64::NAN, ..DeviceConfig::default() },
        DeviceConfig { buffer_frame_size: 100, ..DeviceConfig::default() },
        DeviceConfig { name: "  ".to_string(), ..DeviceConfig::default() },
    ] {
        let err = plugin.create_device(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    // Nothing was allocated for the rejected configs
    assert!(plugin.object_map().is_empty());
    assert!(plugin.device_ids().is_empty());
}

#[test]
fn test_device_owns_streams_and_controls() {
    let plugin = PlugIn::new(DriverSettings::default());
    let id = plugin.create_device(&DeviceConfig::default()).unwrap();

    let streams = get(&plugin, id, Selector::STREAMS).into_objects().unwrap();
    let controls = get(&plugin, id, Selector::CONTROLS).into_objects().unwrap();
    let owned = get(&plugin, id, Selector::OWNED_OBJECTS).into_objects().unwrap();

    assert_eq!(streams.len(), 2);
    // Volume and mute per direction
    assert_eq!(controls.len(), 4);
    assert_eq!(owned.len(), 6);
    assert_eq!(plugin.object_map().len(), 7);

    for child in owned {
        assert_eq!(get(&plugin, child, Selector::OWNER), PropertyValue::Object(id));
    }
    assert_eq!(
        get(&plugin, id, Selector::CLASS),
        PropertyValue::ClassId(FourCc::new(*b"adev"))
    );
}

#[test]
fn test_destroy_device_retires_everything() {
    let plugin = PlugIn::new(DriverSettings::default());
    let id = plugin.create_device(&DeviceConfig::default()).unwrap();
    let stream = plugin.device(id).unwrap().stream_ids().unwrap()[0];

    plugin.dispatch(id, Call::StartIo).unwrap();
    plugin.destroy_device(id).unwrap();

    assert!(plugin.object_map().is_empty());
    assert_eq!(
        plugin.dispatch(stream, Call::GetProperty(Selector::DIRECTION)).unwrap_err().kind(),
        ErrorKind::UnknownObject
    );
    assert_eq!(plugin.destroy_device(id).unwrap_err().kind(), ErrorKind::UnknownObject);
}

#[test]
fn test_volume_control_through_dispatch() {
    let plugin = PlugIn::new(DriverSettings::default());
    let id = plugin.create_device(&DeviceConfig::default()).unwrap();
    let controls = get(&plugin, id, Selector::CONTROLS).into_objects().unwrap();

    let volume = controls
        .iter()
        .copied()
        .find(|c| {
            get(&plugin, *c, Selector::CLASS) == PropertyValue::ClassId(FourCc::new(*b"vlme"))
                && get(&plugin, *c, Selector::SCOPE) == PropertyValue::Direction(Direction::Output)
        })
        .unwrap();

    plugin
        .dispatch(volume, Call::SetProperty(Selector::DECIBEL_VALUE, PropertyValue::F64(-12.0)))
        .unwrap();
    assert_eq!(get(&plugin, volume, Selector::RAW_VALUE), PropertyValue::U32(84));
    assert_eq!(get(&plugin, volume, Selector::DECIBEL_VALUE), PropertyValue::F64(-12.0));
    assert_eq!(
        get(&plugin, volume, Selector::DECIBEL_RANGE),
        PropertyValue::Range { min: -96.0, max: 0.0 }
    );
}

#[test]
fn test_property_changes_reach_host() {
    let (host, rx) = ChannelHost::new();
    let plugin = PlugIn::with_host(DriverSettings::default(), Arc::new(host));
    let id = plugin.create_device(&DeviceConfig::default()).unwrap();
    let _ = rx.try_iter().count();

    plugin
        .dispatch(id, Call::SetProperty(Selector::NAME, PropertyValue::Text("Studio".into())))
        .unwrap();

    let change = rx.try_recv().unwrap();
    assert_eq!(change.object, id);
    assert_eq!(change.selectors, vec![Selector::NAME]);
}

#[test]
fn test_has_property_and_class_list() {
    let plugin = PlugIn::new(DriverSettings::default());
    let id = plugin.create_device(&DeviceConfig::default()).unwrap();

    assert_eq!(plugin.dispatch(id, Call::HasProperty(Selector::IO_STATE)).unwrap(), Reply::Bool(true));
    assert_eq!(plugin.dispatch(id, Call::HasProperty(Selector::RAW_VALUE)).unwrap(), Reply::Bool(false));

    let classes = get(&plugin, ObjectId::PLUGIN, Selector::CLASS_LIST);
    match classes {
        PropertyValue::Classes(classes) => {
            for code in [b"adev", b"astr", b"vlme", b"mute"] {
                assert!(classes.contains(&FourCc::new(*code)));
            }
        }
        other => panic!("unexpected class list {:?}", other),
    }
}
