pub mod shared_region;

pub use shared_region::{SharedRegion, SharedRegionHandle};
