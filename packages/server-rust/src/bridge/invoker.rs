//! Generic remote invocation against the configured resource.

use std::sync::Arc;
use std::time::Instant;

use opbridge_core::{CallerContext, ResourceName, Value};
use tracing::{info, info_span, Instrument};

use super::config::{BridgeConfig, ConfigError};
use super::connection::ConnectionManager;
use super::error::BridgeError;
use super::principal::PrincipalPropagator;
use super::translate::ExceptionTranslator;
use crate::traits::{Connector, RemoteCall};
use crate::transport::{StreamConnector, TransportConfig};

/// Operation name, positional arguments, and their parallel type names.
///
/// `arguments.len() == signature.len()` is expected but not checked here;
/// the registry rejects mismatches.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub operation: String,
    pub arguments: Vec<Value>,
    pub signature: Vec<String>,
}

impl OperationRequest {
    #[must_use]
    pub fn new(operation: impl Into<String>, arguments: Vec<Value>, signature: Vec<String>) -> Self {
        Self {
            operation: operation.into(),
            arguments,
            signature,
        }
    }
}

/// Performs invocations on one resource through one cached connection.
pub struct OperationInvoker {
    config: BridgeConfig,
    resource: ResourceName,
    connections: ConnectionManager,
    propagator: PrincipalPropagator,
    translator: ExceptionTranslator,
}

impl OperationInvoker {
    /// Creates an invoker that connects through `connector`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration does not validate.
    pub fn new(config: BridgeConfig, connector: Arc<dyn Connector>) -> Result<Self, ConfigError> {
        let resource = config.validate()?;
        Ok(Self {
            config,
            resource,
            connections: ConnectionManager::new(connector),
            propagator: PrincipalPropagator,
            translator: ExceptionTranslator,
        })
    }

    /// Creates an invoker that connects over TCP to `config.endpoint_url`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration does not validate.
    pub fn from_config(config: BridgeConfig, transport: TransportConfig) -> Result<Self, ConfigError> {
        let connector = StreamConnector::new(config.endpoint_url.clone(), transport);
        Self::new(config, Arc::new(connector))
    }

    /// Invokes `operation` with no caller identity.
    ///
    /// # Errors
    ///
    /// See [`OperationInvoker::invoke_as`].
    pub async fn invoke(
        &self,
        operation: &str,
        arguments: Vec<Value>,
        signature: Vec<String>,
    ) -> Result<Value, BridgeError> {
        self.invoke_as(
            &CallerContext::anonymous(),
            OperationRequest::new(operation, arguments, signature),
        )
        .await
    }

    /// Invokes an operation on behalf of `caller`.
    ///
    /// Privileged operations run inside an impersonation scope whose identity
    /// is chosen by the configured [`IdentityMode`](super::IdentityMode); the
    /// rest run with the caller's context as given.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a blank operation name (nothing is sent).
    /// - `Connection` if no connection can be established or it fails
    ///   mid-call; the failed connection is dropped from the cache.
    /// - `Registry` for resolution failures reported by the registry.
    /// - `Application` with the resource's own failure as the cause.
    /// - `Impersonation` if the scope cannot be entered.
    pub async fn invoke_as(
        &self,
        caller: &CallerContext,
        request: OperationRequest,
    ) -> Result<Value, BridgeError> {
        if request.operation.trim().is_empty() {
            return Err(BridgeError::invalid_request("operation name is required"));
        }

        let span = info_span!(
            "invoke",
            operation = %request.operation,
            arguments = request.arguments.len(),
            trace_id = %caller.trace_id,
            outcome = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            let result = if self.config.is_privileged(&request.operation) {
                let principals = self
                    .propagator
                    .principals_for(self.config.identity_mode, caller);
                self.propagator
                    .run_with_principals(caller, principals, |scoped| async move {
                        self.dispatch(&scoped, request).await
                    })
                    .await
            } else {
                self.dispatch(caller, request).await
            };

            let span = tracing::Span::current();
            span.record("outcome", result.as_ref().map_or_else(BridgeError::kind, |_| "ok"));
            #[allow(clippy::cast_possible_truncation)]
            span.record("duration_ms", start.elapsed().as_millis() as u64);
            result
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        caller: &CallerContext,
        request: OperationRequest,
    ) -> Result<Value, BridgeError> {
        let conn = self.connections.get_connection().await?;

        info!(
            operation = %request.operation,
            parameters = request.arguments.len(),
            "invoking remote operation"
        );

        let call = RemoteCall {
            resource: self.resource.clone(),
            operation: request.operation,
            arguments: request.arguments,
            signature: request.signature,
            principals: caller.principals().cloned(),
        };

        match conn.invoke(call).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if matches!(err, BridgeError::Connection(_)) {
                    self.connections.invalidate(&conn).await;
                }
                Err(self.translator.unwrap(err))
            }
        }
    }

    /// The resource every invocation targets.
    #[must_use]
    pub fn resource(&self) -> &ResourceName {
        &self.resource
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Closes the cached connection; the next invocation reconnects.
    pub async fn close(&self) {
        self.connections.close().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
