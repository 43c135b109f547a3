use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use simple_audio::config::SettingsStore;
use simple_audio::core::{DriverObject, PropertyValue, Selector};
use simple_audio::hal::Direction;
use simple_audio::plugin::PlugIn;
use simple_audio::transport::{ClientCredentials, KernelTransport, TransportServer, UserClient};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a simulated SimpleAudio device through the user-client transport")]
struct Cli {
    /// Driver settings file. Created with defaults when missing.
    #[arg(short, long, env = "SIMPLE_AUDIO_CONFIG", default_value = "simple-audio.json")]
    config: PathBuf,

    /// How long to keep IO running, in milliseconds. Ctrl-C stops early.
    #[arg(short, long, default_value_t = 1000)]
    duration_ms: u64,

    /// Overrides the default device's nominal sample rate.
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Overrides the default device's IO buffer size in frames.
    #[arg(long)]
    buffer_frames: Option<u32>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store = SettingsStore::new(cli.config.clone());
    let settings = store.load().await?;

    let mut device_config = settings.default_device.clone();
    if let Some(rate) = cli.sample_rate {
        device_config.sample_rate = rate;
    }
    if let Some(frames) = cli.buffer_frames {
        device_config.buffer_frame_size = frames;
    }

    let plugin = Arc::new(PlugIn::new(settings));
    let device = plugin
        .create_device(&device_config)
        .context("Failed to create device")?;

    let transport = Arc::new(KernelTransport::new(plugin.clone()));
    let session = transport
        .open(ClientCredentials::root(std::process::id()))
        .context("Failed to open transport session")?;
    let (server, server_task) = TransportServer::spawn(transport.clone(), 64);
    let client = UserClient::new(server, session);

    let name = client.get_property(device, Selector::NAME).await?;
    let streams = client.get_property(device, Selector::STREAMS).await?.into_objects()?;
    println!("Device {} {:?} with {} streams", device, name, streams.len());

    let handle = plugin.device(device)?;
    let input = streams.iter().copied().find(|id| {
        plugin
            .object_map()
            .lookup(*id)
            .and_then(|s| s.get_property(Selector::DIRECTION))
            .map(|d| d == PropertyValue::Direction(Direction::Input))
            .unwrap_or(false)
    });
    let region = match input {
        Some(stream) => Some(transport.map_buffer(session, stream)?),
        None => None,
    };

    client.start_hardware(device).await?;
    tracing::info!(device = %device, duration_ms = cli.duration_ms, "IO running");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(cli.duration_ms)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    let timestamp = client.zero_timestamp(device).await?;
    if let Err(e) = client.stop_hardware(device).await {
        tracing::warn!(error = %e, "stop reported an error");
    }

    println!(
        "Last zero timestamp: sample {} at host {}ns (seed {})",
        timestamp.sample_time, timestamp.host_time, timestamp.seed
    );
    if let Some(region) = &region {
        println!(
            "Input stream {} produced up to frame {}",
            region.stream(),
            region.producer_index()
        );
    }
    println!(
        "Dropped cycles: {}",
        handle.get_property(Selector::DROPPED_CYCLES)?.as_u64()?
    );

    drop(region);
    drop(handle);
    transport.close(session)?;
    drop(client);
    if let Err(e) = server_task.await {
        tracing::warn!(error = %e, "transport server task failed");
    }

    println!("\n{}", plugin.metrics_report());
    plugin.shutdown();
    Ok(())
}
