//! Bridge-side transports to a resource registry.
//!
//! - `stream`: TCP, reached directly or through a discovery lookup
//! - `local`: in-process, for embedding a registry next to the bridge

pub mod config;
pub mod endpoint;
pub mod frame;
pub mod local;
pub mod stream;

pub use config::{TransportConfig, DEFAULT_MAX_FRAME_LENGTH};
pub use endpoint::EndpointUrl;
pub use local::LocalConnector;
pub use stream::{StreamConnection, StreamConnector};
