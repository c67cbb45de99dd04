use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds applied to every run held by the log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogLimits {
    pub max_events_per_run: usize,
    pub max_payload_bytes: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self {
            max_events_per_run: 100_000,
            max_payload_bytes: 256 * 1024,
        }
    }
}

/// Tailing behaviour of the stream publisher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublisherCfg {
    pub poll_interval_ms: u64,
}

impl PublisherCfg {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for PublisherCfg {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
        }
    }
}
