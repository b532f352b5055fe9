//! In-process transport: invokes a [`ResourceRegistry`] without a socket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use opbridge_core::Value;

use crate::bridge::{BridgeError, ConnectionError};
use crate::registry::{InvocationContext, ResourceRegistry};
use crate::traits::{Connector, RegistryConnection, RemoteCall};

/// Connects to a registry living in the same process.
///
/// Faults take the same [`RemoteFault`](opbridge_core::messages::RemoteFault)
/// to [`BridgeError`] path as the stream transport, so the bridge sees
/// identical errors either way.
pub struct LocalConnector {
    registry: Arc<ResourceRegistry>,
    next_id: AtomicU64,
}

impl LocalConnector {
    #[must_use]
    pub fn new(registry: Arc<ResourceRegistry>) -> Self {
        Self {
            registry,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> Result<Arc<dyn RegistryConnection>, ConnectionError> {
        Ok(Arc::new(LocalConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            registry: Arc::clone(&self.registry),
            open: AtomicBool::new(true),
        }))
    }

    fn endpoint(&self) -> &str {
        "local"
    }
}

struct LocalConnection {
    id: u64,
    registry: Arc<ResourceRegistry>,
    open: AtomicBool,
}

#[async_trait]
impl RegistryConnection for LocalConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn invoke(&self, call: RemoteCall) -> Result<Value, BridgeError> {
        if !self.is_open() {
            return Err(ConnectionError::Closed.into());
        }
        let ctx = InvocationContext {
            session_id: Some(self.id),
            principals: call.principals,
        };
        self.registry
            .invoke(&call.resource, &call.operation, call.arguments, &call.signature, &ctx)
            .await
            .map_err(BridgeError::from)
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        if self.open.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::Closed)
        }
    }
}
