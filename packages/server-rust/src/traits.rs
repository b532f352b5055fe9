use std::sync::Arc;

use async_trait::async_trait;
use opbridge_core::{PrincipalSet, ResourceName, Value};

use crate::bridge::{BridgeError, ConnectionError};

/// One invocation as handed to a registry connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub resource: ResourceName,
    pub operation: String,
    pub arguments: Vec<Value>,
    pub signature: Vec<String>,
    /// Identity of the impersonation scope the call runs in, if any.
    pub principals: Option<PrincipalSet>,
}

/// An established connection to a registry.
/// Implementations: TCP stream (both transports), in-process (embedding, tests).
#[async_trait]
pub trait RegistryConnection: Send + Sync {
    /// Registry-assigned identifier of this connection.
    fn id(&self) -> u64;

    /// Whether the transport still considers the connection usable.
    fn is_open(&self) -> bool;

    /// Performs one invocation. Registry faults are already classified into
    /// [`BridgeError`] variants; transport failures are `BridgeError::Connection`.
    async fn invoke(&self, call: RemoteCall) -> Result<Value, BridgeError>;

    /// Tears the connection down.
    async fn close(&self) -> Result<(), ConnectionError>;
}

/// Establishes registry connections for one configured endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RegistryConnection>, ConnectionError>;

    /// Human-readable endpoint description for logs.
    fn endpoint(&self) -> &str;
}
