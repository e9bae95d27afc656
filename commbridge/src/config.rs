//! Polling configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where drain passes run while a polling scope is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollingMode {
    /// A dedicated driver thread, parked whenever nothing is outstanding.
    Background,
    /// The caller's own execution resources: a driver task on the current
    /// tokio runtime, plus any thread blocked in `sync_wait`.
    #[default]
    Cooperative,
}

impl PollingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Cooperative => "cooperative",
        }
    }
}

impl FromStr for PollingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "background" => Ok(Self::Background),
            "cooperative" => Ok(Self::Cooperative),
            other => Err(format!(
                "invalid polling mode '{other}', expected 'background' or 'cooperative'"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Back-off between drain passes while operations are in flight.
    /// Zero yields instead of sleeping.
    pub poll_interval: Duration,
    /// How long an idle driver parks before re-checking for work.
    pub idle_timeout: Duration,
    /// Name of the background driver thread.
    pub thread_name: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_micros(
                std::env::var("COMMBRIDGE_POLL_INTERVAL_US")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(100),
            ),
            idle_timeout: Duration::from_millis(
                std::env::var("COMMBRIDGE_IDLE_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .filter(|ms| *ms > 0)
                    .unwrap_or(10),
            ),
            thread_name: "commbridge-poll".to_string(),
        }
    }
}

impl PollingConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
