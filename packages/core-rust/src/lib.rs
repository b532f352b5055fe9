//! `opbridge` core: value model, resource names, caller identity, and the
//! wire messages shared by the bridge and the registry.

pub mod context;
pub mod messages;
pub mod resource_name;
pub mod types;

pub use context::CallerContext;
pub use resource_name::{ResourceName, ResourceNameError};
pub use types::{Principal, PrincipalSet, Value, ValueType};
