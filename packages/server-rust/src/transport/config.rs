//! Client-side transport settings.

use std::time::Duration;

/// Default upper bound on a single frame, in bytes.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Settings for connecting to a registry over TCP.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bound on each connect step: discovery lookup, dial, and handshake.
    pub connect_timeout: Duration,
    /// Largest frame accepted or sent.
    pub max_frame_length: usize,
    /// Bounded mpsc capacity for requests waiting to be written.
    pub outbound_channel_capacity: usize,
    /// Name announced in the `OPEN` handshake.
    pub client_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            outbound_channel_capacity: 256,
            client_name: "opbridge".to_string(),
        }
    }
}

impl TransportConfig {
    /// Timeout in whole milliseconds, for error reports.
    #[must_use]
    pub fn connect_timeout_ms(&self) -> u64 {
        u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
