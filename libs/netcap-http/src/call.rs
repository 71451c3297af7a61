use netcap::{NetworkContext, system_millis};
use uuid::Uuid;

/// Identity and start time of one logical call.
///
/// Stored in the request extensions by the application layer so the network
/// layer reports under the same deduplication key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    id: String,
    start_time_ms: u64,
}

impl CallContext {
    #[must_use]
    pub fn start(ctx: &NetworkContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            start_time_ms: ctx.now_millis(),
        }
    }

    /// Deduplication key of the call.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn start_time_ms(&self) -> u64 {
        self.start_time_ms
    }
}

/// Clock the wrapped client stack stamps its own timestamps with.
pub trait ClientClock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClientClock;

impl ClientClock for SystemClientClock {
    fn now_millis(&self) -> u64 {
        system_millis()
    }
}

/// Milliseconds to add to a client timestamp to land on the SDK clock.
#[must_use]
pub fn clock_offset(sdk_now: u64, client_now: u64) -> i64 {
    sdk_now.cast_signed().wrapping_sub(client_now.cast_signed())
}

#[must_use]
pub fn to_sdk_time(client_time: u64, offset: i64) -> u64 {
    client_time.saturating_add_signed(offset)
}
