use std::time::SystemTime;

use tokio::time::Instant;

/// Source of the wall-clock timestamps written into session records.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock pinned to the tokio monotonic clock at construction.
///
/// Timestamps never go backwards even if the system clock is adjusted, which keeps
/// `last_checkpoint <= now` true for every open session. Under a paused tokio runtime
/// it follows the virtual clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    wall_anchor: SystemTime,
    mono_anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::anchored_at(SystemTime::now())
    }

    /// Start the clock at an arbitrary wall-clock instant.
    pub fn anchored_at(wall_anchor: SystemTime) -> Self {
        Self {
            wall_anchor,
            mono_anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> SystemTime {
        self.wall_anchor + self.mono_anchor.elapsed()
    }
}
