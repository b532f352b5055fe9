//! opbridge server: a bridge that invokes named operations on a manageable
//! resource held by a remote registry, plus the registry host it talks to.
//!
//! - `bridge`: connection caching, identity scopes, error unwrapping, invocation
//! - `transport`: TCP stream (direct or discovery) and in-process connectors
//! - `registry`: resources, the registry, its stream and discovery listeners
//! - `network`: the HTTP surface over the bridge

pub mod bridge;
pub mod network;
pub mod registry;
pub mod traits;
pub mod transport;

pub use bridge::{BridgeConfig, BridgeError, OperationInvoker, OperationRequest};
pub use traits::{Connector, RegistryConnection, RemoteCall};
