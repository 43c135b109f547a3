use crossbeam_channel::{bounded, Receiver, Sender};
use simple_audio::config::DriverSettings;
use simple_audio::core::{ObjectId, PropertyValue, Selector};
use simple_audio::hal::{DeviceConfig, Direction, Stream};
use simple_audio::plugin::{Call, Host, PlugIn};
use std::sync::{Arc, Barrier, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Parks any notification about one chosen object until released.
struct GateHost {
    gated: OnceLock<ObjectId>,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl Host for GateHost {
    fn properties_changed(&self, object: ObjectId, _selectors: &[Selector]) {
        if self.gated.get() == Some(&object) {
            let _ = self.entered.send(());
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }
    }
}

fn exercise(plugin: &PlugIn, id: ObjectId) {
    for n in 0..20 {
        plugin
            .dispatch(id, Call::SetProperty(Selector::NAME, PropertyValue::Text(format!("b-{}", n))))
            .unwrap();
        get(plugin, id, Selector::NAME);
    }
    plugin
        .dispatch(id, Call::SetProperty(Selector::NOMINAL_SAMPLE_RATE, PropertyValue::F64(48000.0)))
        .unwrap();
    plugin.dispatch(id, Call::AddStream(Direction::Output)).unwrap();
    plugin.dispatch(id, Call::StartIo).unwrap();
    plugin.dispatch(id, Call::StopIo).unwrap();
}

fn get(plugin: &PlugIn, id: ObjectId, selector: Selector) -> PropertyValue {
    plugin
        .dispatch(id, Call::GetProperty(selector))
        .unwrap()
        .into_value()
        .unwrap()
}

#[test]
fn test_calls_on_distinct_devices_run_in_parallel() {
    let plugin = Arc::new(PlugIn::new(DriverSettings::default()));
    let devices: Vec<_> = (0..8)
        .map(|i| {
            let config = DeviceConfig {
                name: format!("Device {}", i),
                ..DeviceConfig::default()
            };
            plugin.create_device(&config).unwrap()
        })
        .collect();

    let barrier = Arc::new(Barrier::new(devices.len()));
    let workers: Vec<_> = devices
        .iter()
        .copied()
        .enumerate()
        .map(|(i, id)| {
            let plugin = plugin.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for n in 0..125 {
                    let name = format!("device-{}-{}", i, n);
                    plugin
                        .dispatch(id, Call::SetProperty(Selector::NAME, PropertyValue::Text(name)))
                        .unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    for (i, id) in devices.into_iter().enumerate() {
        assert_eq!(
            get(&plugin, id, Selector::NAME),
            PropertyValue::Text(format!("device-{}-124", i))
        );
    }
}

#[test]
fn test_writes_to_one_device_never_interleave() {
    let plugin = Arc::new(PlugIn::new(DriverSettings::default()));
    let id = plugin.create_device(&DeviceConfig::default()).unwrap();
    let payloads: Vec<String> = (0..4).map(|i| char::from(b'a' + i).to_string().repeat(512)).collect();

    let writers: Vec<_> = payloads
        .iter()
        .cloned()
        .map(|payload| {
            let plugin = plugin.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    plugin
                        .dispatch(
                            id,
                            Call::SetProperty(Selector::NAME, PropertyValue::Text(payload.clone())),
                        )
                        .unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let plugin = plugin.clone();
        let payloads = payloads.clone();
        thread::spawn(move || {
            for _ in 0..500 {
                match get(&plugin, id, Selector::NAME) {
                    PropertyValue::Text(name) => {
                        assert!(
                            name == "SimpleAudio Device" || payloads.contains(&name),
                            "torn name of {} bytes",
                            name.len()
                        );
                    }
                    other => panic!("unexpected value {:?}", other),
                }
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();
}

#[test]
fn test_rate_changes_keep_streams_consistent() {
    let plugin = Arc::new(PlugIn::new(DriverSettings::default()));
    let id = plugin.create_device(&DeviceConfig::default()).unwrap();
    let streams = plugin.device(id).unwrap().stream_ids().unwrap();

    let writers: Vec<_> = [44100.0, 48000.0, 44100.0, 48000.0]
        .into_iter()
        .map(|rate| {
            let plugin = plugin.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    plugin
                        .dispatch(
                            id,
                            Call::SetProperty(Selector::NOMINAL_SAMPLE_RATE, PropertyValue::F64(rate)),
                        )
                        .unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }

    let rate = plugin.device(id).unwrap().timing().unwrap().sample_rate;
    for stream in streams {
        let stream = plugin.object_map().lookup_as::<Stream>(stream).unwrap();
        assert_eq!(stream.format().unwrap().sample_rate, rate);
    }
}

#[test]
fn test_busy_device_does_not_block_other_devices() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let host = Arc::new(GateHost {
        gated: OnceLock::new(),
        entered: entered_tx,
        release: release_rx,
    });
    let plugin = Arc::new(PlugIn::with_host(DriverSettings::default(), host.clone()));
    let busy = plugin.create_device(&DeviceConfig::default()).unwrap();
    let other = plugin.create_device(&DeviceConfig::default()).unwrap();
    host.gated.set(busy).unwrap();

    let parked = {
        let plugin = plugin.clone();
        thread::spawn(move || {
            plugin
                .dispatch(busy, Call::SetProperty(Selector::NAME, PropertyValue::Text("busy".into())))
                .unwrap();
        })
    };
    entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();

    let started = Instant::now();
    exercise(&plugin, other);
    assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
    assert!(!parked.is_finished());

    release_tx.send(()).unwrap();
    parked.join().unwrap();
    assert_eq!(get(&plugin, busy, Selector::NAME), PropertyValue::Text("busy".into()));
}

#[test]
fn test_slow_drain_does_not_block_other_devices() {
    let settings = DriverSettings {
        drain_timeout_ms: 2000,
        ..DriverSettings::default()
    };
    let plugin = Arc::new(PlugIn::new(settings));
    let draining = plugin.create_device(&DeviceConfig::default()).unwrap();
    let other = plugin.create_device(&DeviceConfig::default()).unwrap();

    let device = plugin.device(draining).unwrap();
    device.start().unwrap();
    device.inject_io_stall(Duration::from_millis(400));
    thread::sleep(Duration::from_millis(30));

    let stopper = {
        let plugin = plugin.clone();
        thread::spawn(move || plugin.dispatch(draining, Call::StopIo))
    };
    thread::sleep(Duration::from_millis(10));

    let started = Instant::now();
    exercise(&plugin, other);
    // The draining device still answers reads
    get(&plugin, draining, Selector::NAME);
    assert!(started.elapsed() < Duration::from_millis(200), "took {:?}", started.elapsed());
    assert!(!stopper.is_finished());

    stopper.join().unwrap().unwrap();
}
