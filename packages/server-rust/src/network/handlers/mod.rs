//! HTTP handlers for the bridge.
//!
//! Defines `AppState` (the shared state carried through axum extractors)
//! and re-exports the handler functions used to build the router.

pub mod caller;
pub mod error;
pub mod health;
pub mod invoke;

pub use caller::{AuthenticatedPrincipal, Caller};
pub use error::ApiError;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use invoke::{invoke_handler, test_handler, InvokeBody};

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::bridge::OperationInvoker;

/// Shared application state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// The bridge every invocation goes through.
    pub invoker: Arc<OperationInvoker>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bridge::BridgeConfig;
    use crate::registry::echo::demo_registry;
    use crate::transport::LocalConnector;

    /// State backed by an in-process registry holding the reference resource.
    pub(crate) fn test_state() -> AppState {
        let connector = LocalConnector::new(Arc::new(demo_registry()));
        let invoker = OperationInvoker::new(BridgeConfig::default(), Arc::new(connector)).unwrap();
        AppState {
            invoker: Arc::new(invoker),
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(NetworkConfig::default()),
            start_time: Instant::now(),
        }
    }
}
