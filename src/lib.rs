pub mod buffers;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod hal;
pub mod observability;
pub mod plugin;
pub mod registry;
pub mod transport;

pub use config::{DriverSettings, SettingsStore};
pub use core::{ObjectId, ObjectMap, PropertyValue, Selector};
pub use error::{DriverError, ErrorKind, Result};
pub use hal::{Device, DeviceConfig, Direction, SampleFormat, Stream, StreamFormat};
pub use plugin::{Call, PlugIn, Reply};
pub use transport::{ClientCredentials, KernelTransport, TransportServer, UserClient};
