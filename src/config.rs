use crate::error::{DriverError, Result as DriverResult};
use crate::hal::types::DeviceConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub const DEFAULT_ENTITLEMENT: &str = "com.simpleaudio.driver.client";

/// Driver-wide settings, persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverSettings {
    /// Largest request or response payload the transport accepts, in bytes.
    pub max_message_size: usize,
    /// Upper bound on how long `stop()` waits for the IO thread.
    pub drain_timeout_ms: u64,
    /// Nominal rates a device may run at, published as its available rates.
    pub supported_sample_rates: Vec<f64>,
    pub supported_buffer_frame_sizes: Vec<u32>,
    pub max_channels: u32,
    pub required_entitlement: String,
    pub allow_root_clients: bool,
    pub default_device: DeviceConfig,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_message_size: 4096,
            drain_timeout_ms: 250,
            supported_sample_rates: vec![44100.0, 48000.0],
            supported_buffer_frame_sizes: vec![64, 128, 256, 512, 1024, 2048, 4096],
            max_channels: 64,
            required_entitlement: DEFAULT_ENTITLEMENT.to_string(),
            allow_root_clients: true,
            default_device: DeviceConfig::default(),
        }
    }
}

impl DriverSettings {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn validate(&self) -> DriverResult<()> {
        if self.max_message_size == 0 {
            return Err(DriverError::invalid_config("max_message_size must be positive"));
        }
        if self.supported_sample_rates.is_empty() {
            return Err(DriverError::invalid_config("at least one sample rate must be supported"));
        }
        if let Some(rate) = self
            .supported_sample_rates
            .iter()
            .find(|r| !r.is_finite() || **r <= 0.0)
        {
            return Err(DriverError::invalid_config(format!("sample rate {} is not usable", rate)));
        }
        if self.supported_buffer_frame_sizes.is_empty() {
            return Err(DriverError::invalid_config("at least one buffer frame size must be supported"));
        }
        if self.supported_buffer_frame_sizes.contains(&0) {
            return Err(DriverError::invalid_config("buffer frame size 0 is not usable"));
        }
        Ok(())
    }

    pub fn check_sample_rate(&self, sample_rate: f64) -> DriverResult<()> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(DriverError::invalid_config(format!(
                "sample rate must be a positive number, got {}",
                sample_rate
            )));
        }
        if !self.supported_sample_rates.contains(&sample_rate) {
            return Err(DriverError::invalid_config(format!(
                "sample rate {} is not one of {:?}",
                sample_rate, self.supported_sample_rates
            )));
        }
        Ok(())
    }

    pub fn check_buffer_frame_size(&self, frames: u32) -> DriverResult<()> {
        if !self.supported_buffer_frame_sizes.contains(&frames) {
            return Err(DriverError::invalid_config(format!(
                "buffer frame size {} is not one of {:?}",
                frames, self.supported_buffer_frame_sizes
            )));
        }
        Ok(())
    }

    pub fn check_ring_size(&self, ring_frames: u32, buffer_frames: u32) -> DriverResult<()> {
        if ring_frames < buffer_frames {
            return Err(DriverError::invalid_config(format!(
                "ring buffer of {} frames cannot hold an IO buffer of {} frames",
                ring_frames, buffer_frames
            )));
        }
        Ok(())
    }

    /// Checks a device config before anything is created for it.
    pub fn validate_device(&self, config: &DeviceConfig) -> DriverResult<()> {
        if config.name.trim().is_empty() {
            return Err(DriverError::invalid_config("device name must not be empty"));
        }
        self.check_sample_rate(config.sample_rate)?;
        self.check_buffer_frame_size(config.buffer_frame_size)?;
        self.check_ring_size(config.ring_buffer_frame_size, config.buffer_frame_size)?;

        for (label, channels) in [("input", config.input_channels), ("output", config.output_channels)] {
            if channels > self.max_channels {
                return Err(DriverError::invalid_config(format!(
                    "{} channel count {} exceeds the maximum of {}",
                    label, channels, self.max_channels
                )));
            }
        }
        Ok(())
    }
}

/// Loads and persists `DriverSettings`
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn ensure_file(&self) -> Result<()> {
        if !self.path.exists() {
            // Create parent directory
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create settings directory")?;
            }

            let json = serde_json::to_string_pretty(&DriverSettings::default())?;
            fs::write(&self.path, json)
                .await
                .context("Failed to write default settings")?;

            tracing::info!(path = %self.path.display(), "wrote default driver settings");
        }

        Ok(())
    }

    pub async fn load(&self) -> Result<DriverSettings> {
        self.ensure_file().await?;

        let content = fs::read_to_string(&self.path)
            .await
            .context("Failed to read settings file")?;

        let settings: DriverSettings =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;
        settings
            .validate()
            .with_context(|| format!("Invalid settings in {}", self.path.display()))?;

        Ok(settings)
    }

    pub async fn save(&self, settings: &DriverSettings) -> Result<()> {
        let json = serde_json::to_string_pretty(settings)?;

        // Write to temporary file first
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json)
            .await
            .context("Failed to write temporary settings file")?;

        // Atomic rename
        fs::rename(&temp_path, &self.path)
            .await
            .context("Failed to atomically update settings file")?;

        Ok(())
    }
}
