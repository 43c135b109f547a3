pub mod control;
pub mod device;
pub mod format_converter;
pub mod stream;
pub mod types;

pub use control::{MuteControl, VolumeControl, VolumeCurve};
pub use device::{Device, IoTiming};
pub use stream::Stream;
pub use types::{DeviceConfig, Direction, SampleFormat, StreamFormat};
