//! The registry side: manageable resources and the listeners that expose them.
//!
//! - `resource`: the [`ManagedResource`] trait resources implement
//! - `registry`: name resolution, signature matching, argument checks
//! - `server`: TCP stream listener serving a registry to bridges
//! - `discovery`: name-to-address lookups for `discovery://` endpoints
//! - `echo`: the reference resource

pub mod config;
pub mod discovery;
pub mod echo;
#[allow(clippy::module_inception)]
pub mod registry;
pub mod resource;
pub mod server;
pub mod session;

pub use config::{RegistryServerConfig, SessionConfig, DEFAULT_REGISTRY_PORT};
pub use discovery::DiscoveryServer;
pub use echo::{demo_registry, TestResource, TEST_RESOURCE_NAME};
pub use registry::{RegisterError, ResourceRegistry};
pub use resource::{InvocationContext, ManagedResource, OperationInfo};
pub use server::RegistryServer;
pub use session::{SessionId, SessionRegistry};
