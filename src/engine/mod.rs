pub mod clock;
pub mod io_thread;
pub mod state;

pub use clock::{host_time_now, ClockAnchor, ZeroTimestamp};
pub use io_thread::{IoParams, IoShared, IoThread, ParamBank};
pub use state::{AtomicIoState, IoState};
