//! Client configuration
//!
//! All durations are carried in milliseconds so the configuration can be
//! loaded from the same JSON documents hosts already use; the `Duration`
//! accessors are what the runtime reads.

use std::time::Duration;

use relaymcp_protocol::{McpError, McpResult};
use serde::{Deserialize, Serialize};

/// Configuration of a single client
///
/// Immutable once the client is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Request timeout in milliseconds
    pub timeout: u64,

    /// Extra send attempts when the transport rejects an outbound write
    pub retries: u32,

    /// Reconnect after an unexpected loss of connection
    pub auto_reconnect: bool,

    /// Reconnection attempts per outage
    pub max_retries: u32,

    /// Base reconnection delay in milliseconds, doubled per attempt
    pub retry_delay: u64,

    /// Heartbeat interval in milliseconds, 0 disables the heartbeat
    pub heartbeat_interval: u64,

    /// Time a heartbeat ping may take in milliseconds
    pub heartbeat_timeout: u64,

    /// Idle time after which a session counts as expired, in milliseconds
    pub session_timeout: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: 30_000,             // 30 seconds
            retries: 3,                  // 3 extra sends
            auto_reconnect: true,
            max_retries: 5,              // 5 attempts per outage
            retry_delay: 1_000,          // 1 second, then 2, 4, 8, 16
            heartbeat_interval: 30_000,  // 30 seconds
            heartbeat_timeout: 10_000,   // 10 seconds
            session_timeout: 3_600_000,  // 1 hour
        }
    }
}

impl ClientConfig {
    /// Request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Heartbeat interval, `None` when the heartbeat is disabled
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval > 0).then(|| Duration::from_millis(self.heartbeat_interval))
    }

    /// Heartbeat ping timeout
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout)
    }

    /// Session idle timeout
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout)
    }

    /// Delay before reconnection attempt number `attempt` (0-based):
    /// `retry_delay * 2^attempt`, saturating
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.retry_delay.saturating_mul(factor))
    }

    /// Check the configuration for values the runtime cannot work with
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error naming the offending field.
    pub fn validate(&self) -> McpResult<()> {
        if self.timeout == 0 {
            return Err(McpError::configuration("timeout must be greater than zero"));
        }
        if self.auto_reconnect && self.retry_delay == 0 {
            return Err(McpError::configuration(
                "retryDelay must be greater than zero when autoReconnect is enabled",
            ));
        }
        if self.heartbeat_interval > 0 && self.heartbeat_timeout == 0 {
            return Err(McpError::configuration(
                "heartbeatTimeout must be greater than zero when the heartbeat is enabled",
            ));
        }
        Ok(())
    }
}
