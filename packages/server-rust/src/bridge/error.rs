//! Error taxonomy surfaced by the invocation bridge.
//!
//! Registry responses are classified into [`BridgeError`] exactly once, by
//! the transport that receives them. Everything above the transport matches
//! on variants instead of inspecting nested causes.

use opbridge_core::messages::{RegistryFault, RemoteException, RemoteFault};

/// Transport failure establishing, using, or losing a registry connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("malformed endpoint url {url:?}: {reason}")]
    MalformedEndpoint { url: String, reason: String },

    #[error("cannot reach {address}: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("connecting to {address} timed out after {timeout_ms}ms")]
    TimedOut { address: String, timeout_ms: u64 },

    #[error("discovery service at {address} cannot resolve {name:?}: {reason}")]
    Lookup {
        address: String,
        name: String,
        reason: String,
    },

    #[error("handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    #[error("connection lost: {reason}")]
    Lost { reason: String },

    #[error("connection is closed")]
    Closed,
}

/// Failure entering or leaving an impersonation scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImpersonationError {
    #[error("cannot enter impersonation scope: {reason}")]
    InvalidPrincipal { reason: String },
}

/// Every way an invocation through the bridge can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// Rejected before any network activity.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Resource, operation, or argument resolution failed in the registry.
    #[error(transparent)]
    Registry(#[from] RegistryFault),

    /// Resource failure still inside the registry's envelope.
    #[error("{message}")]
    WrappedApplication {
        message: String,
        #[source]
        cause: Option<RemoteException>,
    },

    /// Resource failure unwrapped to its original cause.
    #[error(transparent)]
    Application(RemoteException),

    #[error(transparent)]
    Impersonation(#[from] ImpersonationError),
}

impl BridgeError {
    /// Short stable name of the error class, used in logs and HTTP bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Connection(_) => "connection",
            Self::Registry(_) => "registry",
            Self::WrappedApplication { .. } | Self::Application(_) => "application",
            Self::Impersonation(_) => "impersonation",
        }
    }

    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

impl From<RemoteFault> for BridgeError {
    fn from(fault: RemoteFault) -> Self {
        match fault {
            RemoteFault::Registry { fault } => Self::Registry(fault),
            RemoteFault::Application { message, cause } => {
                Self::WrappedApplication { message, cause }
            }
        }
    }
}
