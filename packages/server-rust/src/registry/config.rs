//! Registry listener configuration.

use std::time::Duration;

use crate::transport::DEFAULT_MAX_FRAME_LENGTH;

/// Port the registry stream listener uses when none is configured.
pub const DEFAULT_REGISTRY_PORT: u16 = 9998;

/// Settings for a [`RegistryServer`](super::RegistryServer).
#[derive(Debug, Clone)]
pub struct RegistryServerConfig {
    /// Bind address for the stream listener.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Largest frame accepted or sent.
    pub max_frame_length: usize,
    /// Per-session settings.
    pub session: SessionConfig,
    /// How long shutdown waits for in-flight invocations.
    pub drain_timeout: Duration,
}

impl Default for RegistryServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_REGISTRY_PORT,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            session: SessionConfig::default(),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-session backpressure settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bounded mpsc channel capacity for outbound responses per session.
    pub outbound_channel_capacity: usize,
    /// Maximum time to wait when queueing a response for a session.
    pub send_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            send_timeout: Duration::from_secs(5),
        }
    }
}
