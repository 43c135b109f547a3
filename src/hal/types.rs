use crate::error::{DriverError, Result};
use serde::{Deserialize, Serialize};

/// Stream direction, also the scope of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Sample data format, little-endian interleaved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    I16,  // 16-bit PCM
    I24,  // 24-bit packed
    I32,  // 32-bit integer
    F32,  // 32-bit float
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 4] = [Self::I16, Self::I24, Self::I32, Self::F32];

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::I16 => 2,
            Self::I24 => 3,
            Self::I32 | Self::F32 => 4,
        }
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        SampleFormat::I16
    }
}

/// Layout of the frames a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: f64,
    pub channels: u32,
    pub sample_format: SampleFormat,
}

impl StreamFormat {
    pub fn new(sample_rate: f64, channels: u32, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(DriverError::invalid_config(format!(
                "stream sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.channels == 0 {
            return Err(DriverError::invalid_config("stream needs at least one channel"));
        }
        Ok(())
    }
}

/// Parameters a device is created with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub manufacturer: String,
    pub sample_rate: f64,
    pub buffer_frame_size: u32,
    pub ring_buffer_frame_size: u32,
    pub latency: u32,
    pub safety_offset: u32,
    pub input_channels: u32,
    pub output_channels: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "SimpleAudio Device".to_string(),
            manufacturer: "SimpleAudio".to_string(),
            sample_rate: 44100.0,
            buffer_frame_size: 512,
            ring_buffer_frame_size: 16384,
            latency: 0,
            safety_offset: 0,
            input_channels: 2,
            output_channels: 2,
        }
    }
}

impl DeviceConfig {
    pub fn channels(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Input => self.input_channels,
            Direction::Output => self.output_channels,
        }
    }
}
