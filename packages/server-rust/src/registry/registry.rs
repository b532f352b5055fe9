//! Directory and dispatcher of manageable resources.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use opbridge_core::messages::{RegistryFault, RemoteFault};
use opbridge_core::{ResourceName, Value, ValueType};
use tracing::{debug, warn};

use super::resource::{InvocationContext, ManagedResource};

/// Error registering a resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("resource already registered: {0}")]
    AlreadyRegistered(ResourceName),
}

/// Registry of manageable resources keyed by [`ResourceName`].
///
/// Resolves invocations by operation name and exact signature, checks the
/// arguments against the resolved operation, and wraps resource failures
/// in [`RemoteFault::Application`].
pub struct ResourceRegistry {
    resources: DashMap<ResourceName, Arc<dyn ManagedResource>>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
        }
    }

    /// Registers a resource under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::AlreadyRegistered`] if the name is taken; the
    /// existing registration is kept.
    pub fn register<R: ManagedResource + 'static>(
        &self,
        name: ResourceName,
        resource: R,
    ) -> Result<(), RegisterError> {
        match self.resources.entry(name) {
            Entry::Occupied(entry) => {
                warn!(resource = %entry.key(), "resource already registered");
                Err(RegisterError::AlreadyRegistered(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                debug!(resource = %entry.key(), "registered resource");
                entry.insert(Arc::new(resource));
                Ok(())
            }
        }
    }

    /// Removes a resource. Returns `false` if it was not registered.
    pub fn unregister(&self, name: &ResourceName) -> bool {
        self.resources.remove(name).is_some()
    }

    #[must_use]
    pub fn contains(&self, name: &ResourceName) -> bool {
        self.resources.contains_key(name)
    }

    /// Names of all registered resources, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<ResourceName> {
        let mut names: Vec<ResourceName> =
            self.resources.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Resolves and runs one invocation.
    ///
    /// Checks, in order: the resource exists; an operation with this name and
    /// exact signature exists; the argument count equals the signature length;
    /// each argument has its signature type (null fits any type).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteFault::Registry`] for resolution failures and
    /// [`RemoteFault::Application`] wrapping the resource's own failure.
    pub async fn invoke(
        &self,
        resource: &ResourceName,
        operation: &str,
        arguments: Vec<Value>,
        signature: &[String],
        ctx: &InvocationContext,
    ) -> Result<Value, RemoteFault> {
        // Clone the Arc out so no map guard is held across the await.
        let target = self
            .resources
            .get(resource)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryFault::ResourceNotFound {
                resource: resource.clone(),
            })?;

        let info = target
            .operations()
            .into_iter()
            .find(|op| op.name == operation && op.matches_signature(signature))
            .ok_or_else(|| RegistryFault::OperationNotFound {
                resource: resource.clone(),
                operation: operation.to_string(),
                signature: signature.to_vec(),
            })?;

        if arguments.len() != signature.len() {
            return Err(RegistryFault::ArgumentCountMismatch {
                operation: operation.to_string(),
                arguments: arguments.len(),
                signature: signature.len(),
            }
            .into());
        }

        for (index, (arg, expected)) in arguments.iter().zip(&info.params).enumerate() {
            let actual = arg.value_type();
            if actual != ValueType::Null && actual != *expected {
                return Err(RegistryFault::ArgumentTypeMismatch {
                    operation: operation.to_string(),
                    index,
                    expected: expected.type_name().to_string(),
                    actual: actual.type_name().to_string(),
                }
                .into());
            }
        }

        target
            .invoke(&info, arguments, ctx)
            .await
            .map_err(|cause| RemoteFault::Application {
                message: format!("invocation of {operation} on {resource} failed"),
                cause: Some(cause),
            })
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
