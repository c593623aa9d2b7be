//! Engine configuration.

use std::time::Duration;

use serde::Deserialize;
use streamsync_core::{Result, SyncError};

/// Tunables for buffers, node RPCs and remote liveness probing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Hard ceiling of every dynamic message buffer.
    pub buffer_capacity: usize,
    /// Timeout of a node RPC that carries a single stream.
    #[serde(with = "duration_millis")]
    pub single_item_timeout: Duration,
    /// Upper bound on the multiple of `single_item_timeout` granted to one RPC.
    pub max_timeout_multiplier: u32,
    /// How long a cancel waits for the session to acknowledge.
    #[serde(with = "duration_millis")]
    pub command_reply_timeout: Duration,
    /// Liveness prober tick.
    #[serde(with = "duration_millis")]
    pub ping_check_interval: Duration,
    /// Idle time after which the prober sends a ping.
    #[serde(with = "duration_millis")]
    pub ping_idle_after: Duration,
    /// Idle time after which a remote connection is assumed dead.
    #[serde(with = "duration_millis")]
    pub dead_after: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            single_item_timeout: Duration::from_secs(15),
            max_timeout_multiplier: 8,
            command_reply_timeout: Duration::from_secs(30),
            ping_check_interval: Duration::from_secs(3),
            ping_idle_after: Duration::from_secs(15),
            dead_after: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(SyncError::InvalidArgument(
                "buffer_capacity must be positive".into(),
            ));
        }
        if self.ping_idle_after >= self.dead_after {
            return Err(SyncError::InvalidArgument(
                "ping_idle_after must be shorter than dead_after".into(),
            ));
        }
        Ok(())
    }

    /// Timeout for a node RPC carrying `items` streams.
    pub fn rpc_timeout(&self, items: usize) -> Duration {
        let items = u32::try_from(items.max(1)).unwrap_or(u32::MAX);
        let multiplier = items.min(self.max_timeout_multiplier.max(1));
        self.single_item_timeout * multiplier
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
