//! Tunables for the synchronization engine

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of replays after a version mismatch before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default first backoff delay, doubled per attempt.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 50;

/// Default buffer size for the engine's event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// What to do when a remote write touched the same element as a pending
/// local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Surface `SyncConflict` and drop the local mutation
    #[default]
    Reject,
    /// Replay the local mutation on top of the remote one (last writer wins)
    LocalWins,
}

/// Configuration for [`crate::sync::SyncEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum replays after the first conditional write fails
    pub max_retries: u32,
    /// Backoff before the first replay; doubles on each further attempt
    pub retry_base_delay_ms: u64,
    /// Same-element conflict resolution
    pub conflict_policy: ConflictPolicy,
    /// Capacity of the `SyncEvent` broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            conflict_policy: ConflictPolicy::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Backoff before replay number `attempt` (1-based): base, 2×base, 4×base...
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1 << shift))
    }
}
