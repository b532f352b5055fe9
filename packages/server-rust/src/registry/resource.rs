use async_trait::async_trait;
use opbridge_core::messages::RemoteException;
use opbridge_core::{PrincipalSet, Value, ValueType};

/// Describes one operation a resource exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationInfo {
    pub name: &'static str,
    /// Parameter types, in order. Together with `name` this identifies the
    /// operation; overloads differ in their parameter types.
    pub params: Vec<ValueType>,
    pub returns: ValueType,
}

impl OperationInfo {
    #[must_use]
    pub fn new(name: &'static str, params: Vec<ValueType>, returns: ValueType) -> Self {
        Self {
            name,
            params,
            returns,
        }
    }

    /// Whether `signature` names exactly this operation's parameter types.
    #[must_use]
    pub fn matches_signature(&self, signature: &[String]) -> bool {
        self.params.len() == signature.len()
            && self
                .params
                .iter()
                .zip(signature)
                .all(|(param, name)| param.type_name() == name)
    }
}

/// What a resource learns about the caller of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    /// Registry session the call arrived on; `None` for in-process calls.
    pub session_id: Option<u64>,
    /// Identity of the impersonation scope the bridge issued the call from.
    pub principals: Option<PrincipalSet>,
}

/// A registered object exposing named operations invocable remotely.
///
/// The registry resolves the operation and checks arguments against
/// [`OperationInfo::params`] before calling [`ManagedResource::invoke`], so
/// implementations may rely on argument count and types.
#[async_trait]
pub trait ManagedResource: Send + Sync {
    /// Operations this resource exposes.
    fn operations(&self) -> Vec<OperationInfo>;

    /// Runs an already-resolved operation.
    async fn invoke(
        &self,
        operation: &OperationInfo,
        arguments: Vec<Value>,
        ctx: &InvocationContext,
    ) -> Result<Value, RemoteException>;
}
