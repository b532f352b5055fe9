//! The invocation bridge.
//!
//! Leaves first:
//!
//! 1. **Translation** (`translate`): unwraps registry-wrapped application failures
//! 2. **Connection** (`connection`): lazily established, cached registry connection
//! 3. **Principals** (`principal`): impersonation scopes for privileged operations
//! 4. **Invocation** (`invoker`): one generic remote invocation, end to end

pub mod config;
pub mod connection;
pub mod error;
pub mod invoker;
pub mod principal;
pub mod translate;

pub use config::{BridgeConfig, ConfigError, RETRIEVE_COMMAND_USER};
pub use connection::ConnectionManager;
pub use error::{BridgeError, ConnectionError, ImpersonationError};
pub use invoker::{OperationInvoker, OperationRequest};
pub use principal::{IdentityMode, PrincipalPropagator, SYNTHETIC_PRINCIPAL};
pub use translate::ExceptionTranslator;
