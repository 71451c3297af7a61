use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Clock used for every reported timestamp.
pub trait SdkClock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Wall-clock time anchored once and advanced by a monotonic clock.
///
/// Readings never go backwards, even if the system clock is adjusted.
#[derive(Debug, Clone, Copy)]
pub struct NormalizedClock {
    anchor_millis: u64,
    anchor: Instant,
}

impl NormalizedClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor_millis: system_millis(),
            anchor: Instant::now(),
        }
    }
}

impl Default for NormalizedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SdkClock for NormalizedClock {
    fn now_millis(&self) -> u64 {
        let elapsed = u64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.anchor_millis.saturating_add(elapsed)
    }
}

/// Raw system time, in milliseconds since the Unix epoch.
#[must_use]
pub fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
