use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Device IO states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum IoState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl IoState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: IoState) -> bool {
        use IoState::*;

        matches!(
            (self, target),
            (Stopped, Starting) |

            (Starting, Running) |
            // Start failed or was cancelled
            (Starting, Stopped) |
            (Starting, Stopping) |

            (Running, Stopping) |

            (Stopping, Stopped)
        )
    }

    /// Get human-readable state name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl Default for IoState {
    fn default() -> Self {
        Self::Stopped
    }
}

/// IoState readable without the device lock. Writers hold the device lock.
#[derive(Debug, Default)]
pub struct AtomicIoState(AtomicU8);

impl AtomicIoState {
    pub fn load(&self) -> IoState {
        IoState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Validated transition; returns the state that blocked it.
    pub fn transition(&self, target: IoState) -> Result<(), IoState> {
        let current = self.load();
        if !current.can_transition_to(target) {
            return Err(current);
        }
        self.0.store(target as u8, Ordering::Release);
        Ok(())
    }

    /// Bypasses validation. Used when a drain times out.
    pub fn force(&self, target: IoState) {
        self.0.store(target as u8, Ordering::Release);
    }
}
