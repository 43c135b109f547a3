use simple_audio::config::DriverSettings;
use simple_audio::core::{DriverObject, PropertyValue, Selector};
use simple_audio::hal::{DeviceConfig, Direction, SampleFormat, Stream, StreamFormat};
use simple_audio::plugin::{Call, PlugIn};
use simple_audio::ErrorKind;

fn setup() -> (PlugIn, simple_audio::ObjectId, simple_audio::ObjectId) {
    let plugin = PlugIn::new(DriverSettings::default());
    let device = plugin.create_device(&DeviceConfig::default()).unwrap();
    let output = plugin.device(device).unwrap().stream_ids().unwrap()[1];
    (plugin, device, output)
}

#[test]
fn test_default_streams_follow_device_config() {
    let (plugin, device, output) = setup();
    let streams = plugin.device(device).unwrap().stream_ids().unwrap();
    assert_eq!(streams.len(), 2);

    let stream = plugin.object_map().lookup_as::<Stream>(output).unwrap();
    assert_eq!(stream.direction(), Direction::Output);
    assert_eq!(stream.starting_channel(), 1);
    assert_eq!(
        stream.format().unwrap(),
        StreamFormat::new(44100.0, 2, SampleFormat::I16)
    );
    assert_eq!(stream.core().owner(), device);
}

#[test]
fn test_format_change_while_stopped() {
    let (plugin, _device, output) = setup();
    let format = StreamFormat::new(44100.0, 2, SampleFormat::F32);

    plugin
        .dispatch(output, Call::SetProperty(Selector::FORMAT, PropertyValue::Format(format)))
        .unwrap();

    let stream = plugin.object_map().lookup_as::<Stream>(output).unwrap();
    assert_eq!(stream.format().unwrap(), format);
}

#[test]
fn test_format_change_while_running_is_rejected() {
    let (plugin, device, output) = setup();
    let stream = plugin.object_map().lookup_as::<Stream>(output).unwrap();
    let before = stream.format().unwrap();

    plugin.dispatch(device, Call::StartIo).unwrap();

    let format = StreamFormat::new(44100.0, 1, SampleFormat::I32);
    let err = stream.set_format(format).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(stream.format().unwrap(), before);

    plugin.dispatch(device, Call::StopIo).unwrap();
    stream.set_format(format).unwrap();
    assert_eq!(stream.format().unwrap(), format);
}

#[test]
fn test_format_must_match_device_rate() {
    let (plugin, _device, output) = setup();
    let stream = plugin.object_map().lookup_as::<Stream>(output).unwrap();

    let err = stream
        .set_format(StreamFormat::new(48000.0, 2, SampleFormat::I16))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);

    let err = stream
        .set_format(StreamFormat::new(44100.0, 0, SampleFormat::I16))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
}

#[test]
fn test_device_rate_change_propagates_to_streams() {
    let (plugin, device, output) = setup();

    plugin
        .dispatch(
            device,
            Call::SetProperty(Selector::NOMINAL_SAMPLE_RATE, PropertyValue::F64(48000.0)),
        )
        .unwrap();

    let stream = plugin.object_map().lookup_as::<Stream>(output).unwrap();
    assert_eq!(stream.format().unwrap().sample_rate, 48000.0);
}

#[test]
fn test_stream_properties_and_writability() {
    let (plugin, _device, output) = setup();

    let direction = plugin
        .dispatch(output, Call::GetProperty(Selector::DIRECTION))
        .unwrap()
        .into_value()
        .unwrap();
    assert_eq!(direction, PropertyValue::Direction(Direction::Output));

    let settable = plugin
        .dispatch(output, Call::IsPropertySettable(Selector::DIRECTION))
        .unwrap()
        .into_bool()
        .unwrap();
    assert!(!settable);

    let err = plugin
        .dispatch(
            output,
            Call::SetProperty(Selector::DIRECTION, PropertyValue::Direction(Direction::Input)),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotWritable);

    let err = plugin
        .dispatch(output, Call::GetProperty(Selector::NOMINAL_SAMPLE_RATE))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedProperty);

    let err = plugin
        .dispatch(output, Call::SetProperty(Selector::FORMAT, PropertyValue::U32(2)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_deactivated_stream_stops_producing() {
    let plugin = PlugIn::new(DriverSettings::default());
    let config = DeviceConfig {
        buffer_frame_size: 64,
        ring_buffer_frame_size: 1024,
        ..DeviceConfig::default()
    };
    let device_id = plugin.create_device(&config).unwrap();
    let device = plugin.device(device_id).unwrap();
    let input = device.stream_ids().unwrap()[0];
    let region = device.shared_region(input).unwrap();

    plugin
        .dispatch(input, Call::SetProperty(Selector::IS_ACTIVE, PropertyValue::Bool(false)))
        .unwrap();

    device.start().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(30));
    device.stop().unwrap();

    assert_eq!(region.producer_index(), 0);
}

#[test]
fn test_available_formats_cover_supported_rates() {
    let (plugin, _device, output) = setup();

    let formats = match plugin
        .dispatch(output, Call::GetProperty(Selector::AVAILABLE_FORMATS))
        .unwrap()
        .into_value()
        .unwrap()
    {
        PropertyValue::Formats(formats) => formats,
        other => panic!("unexpected value {:?}", other),
    };

    assert_eq!(formats.len(), 8);
    assert!(formats.iter().all(|f| f.channels == 2));
    assert!(formats.contains(&StreamFormat::new(44100.0, 2, SampleFormat::I16)));
    assert!(formats.contains(&StreamFormat::new(48000.0, 2, SampleFormat::F32)));
}
