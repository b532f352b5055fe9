//! Reference resource: echoes strings and reports the propagated caller.

use async_trait::async_trait;
use opbridge_core::messages::RemoteException;
use opbridge_core::{ResourceName, Value, ValueType};
use tracing::info;

use super::registry::ResourceRegistry;
use super::resource::{InvocationContext, ManagedResource, OperationInfo};

/// Name the reference resource is registered under.
pub const TEST_RESOURCE_NAME: &str = "opbridge.demo:type=Test";

pub const TEST_STRING_ARGUMENT: &str = "testStringArgument";

#[derive(Debug, Clone, Copy, Default)]
pub struct TestResource;

#[async_trait]
impl ManagedResource for TestResource {
    fn operations(&self) -> Vec<OperationInfo> {
        vec![
            OperationInfo::new(TEST_STRING_ARGUMENT, vec![ValueType::String], ValueType::String),
            OperationInfo::new(crate::bridge::RETRIEVE_COMMAND_USER, vec![], ValueType::String),
        ]
    }

    async fn invoke(
        &self,
        operation: &OperationInfo,
        arguments: Vec<Value>,
        ctx: &InvocationContext,
    ) -> Result<Value, RemoteException> {
        match operation.name {
            TEST_STRING_ARGUMENT => {
                let input = arguments.first().and_then(Value::as_str).unwrap_or_default();
                info!(input, "test method called");
                Ok(Value::String(format!("Echo: {input}")))
            }
            crate::bridge::RETRIEVE_COMMAND_USER => match &ctx.principals {
                Some(principals) if !principals.is_empty() => Ok(Value::String(
                    principals.names().collect::<Vec<_>>().join(", "),
                )),
                _ => Err(RemoteException::new(
                    "NoCallerIdentity",
                    "no principals were propagated with this call",
                )),
            },
            other => Err(RemoteException::new(
                "UnsupportedOperation",
                format!("{other} is not implemented"),
            )),
        }
    }
}

/// A registry holding [`TestResource`] under [`TEST_RESOURCE_NAME`].
#[must_use]
pub fn demo_registry() -> ResourceRegistry {
    let registry = ResourceRegistry::new();
    if let Ok(name) = ResourceName::parse(TEST_RESOURCE_NAME) {
        // A fresh registry cannot already hold the name.
        let _ = registry.register(name, TestResource);
    }
    registry
}
