//! Failure types delivered by a registry in response to an invocation.
//!
//! These are wire types: the registry produces them, the bridge classifies
//! them into its own error taxonomy once, at the point the response arrives.

use serde::{Deserialize, Serialize};

use crate::resource_name::ResourceName;

/// How a resource failure should be treated by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultSeverity {
    /// Ordinary application failure; safe to surface as the root cause.
    Recoverable,
    /// Failure that should not be unwrapped from its registry envelope.
    Fatal,
}

/// Failure raised by a manageable resource's own logic.
///
/// Preserves the nested cause chain through [`std::error::Error::source`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{type_name}: {message}")]
pub struct RemoteException {
    /// Name of the failure kind as reported by the resource.
    pub type_name: String,
    pub message: String,
    pub severity: FaultSeverity,
    #[source]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cause: Option<Box<RemoteException>>,
}

impl RemoteException {
    /// A recoverable failure with no nested cause.
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            severity: FaultSeverity::Recoverable,
            cause: None,
        }
    }

    /// Marks this failure as fatal.
    #[must_use]
    pub fn fatal(mut self) -> Self {
        self.severity = FaultSeverity::Fatal;
        self
    }

    /// Attaches a nested cause.
    #[must_use]
    pub fn caused_by(mut self, cause: RemoteException) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.severity == FaultSeverity::Recoverable
    }
}

/// Failure detected by the registry itself while resolving an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryFault {
    #[error("resource not found: {resource}")]
    ResourceNotFound { resource: ResourceName },

    #[error("operation {operation}({}) not found on {resource}", signature.join(", "))]
    OperationNotFound {
        resource: ResourceName,
        operation: String,
        signature: Vec<String>,
    },

    #[error("operation {operation} given {arguments} arguments for a signature of {signature}")]
    ArgumentCountMismatch {
        operation: String,
        arguments: usize,
        signature: usize,
    },

    #[error("argument {index} of {operation} is {actual}, expected {expected}")]
    ArgumentTypeMismatch {
        operation: String,
        index: usize,
        expected: String,
        actual: String,
    },
}

/// Any failure a registry can deliver for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteFault {
    /// Resolution or argument checking failed inside the registry.
    Registry { fault: RegistryFault },
    /// The resource raised a failure, wrapped by the registry.
    Application {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        cause: Option<RemoteException>,
    },
}

impl From<RegistryFault> for RemoteFault {
    fn from(fault: RegistryFault) -> Self {
        Self::Registry { fault }
    }
}
