//! Impersonation scopes for privileged invocations.
//!
//! A scope is a derived [`CallerContext`] whose current identity is the
//! given principal set. The action receives that context and threads it
//! down its own call path; the caller's context is never touched, so the
//! identity current before the scope is the one current after it, whether
//! the action succeeded or failed.

use std::future::Future;

use opbridge_core::{CallerContext, PrincipalSet};
use serde::Deserialize;
use tracing::{debug, Instrument};

use super::error::{BridgeError, ImpersonationError};

/// Fixed identity used by synthetic mode.
pub const SYNTHETIC_PRINCIPAL: &str = "opbridge-test-principal";

/// Where the principal set of a privileged invocation comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// The fixed [`SYNTHETIC_PRINCIPAL`], regardless of the real caller.
    #[default]
    Synthetic,
    /// The caller's already-authenticated principal, or an empty set.
    Derived,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrincipalPropagator;

impl PrincipalPropagator {
    /// Builds the principal set for `caller` under `mode`.
    #[must_use]
    pub fn principals_for(&self, mode: IdentityMode, caller: &CallerContext) -> PrincipalSet {
        match mode {
            IdentityMode::Synthetic => PrincipalSet::single(SYNTHETIC_PRINCIPAL),
            IdentityMode::Derived => PrincipalSet::from_principal(caller.authenticated.as_ref()),
        }
    }

    /// Runs `action` with `principals` as the current identity.
    ///
    /// # Errors
    ///
    /// Returns [`ImpersonationError::InvalidPrincipal`] without running the
    /// action if the set contains a blank name; otherwise returns whatever
    /// the action returns.
    pub async fn run_with_principals<F, Fut, T>(
        &self,
        caller: &CallerContext,
        principals: PrincipalSet,
        action: F,
    ) -> Result<T, BridgeError>
    where
        F: FnOnce(CallerContext) -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        if principals.names().any(|name| name.trim().is_empty()) {
            return Err(ImpersonationError::InvalidPrincipal {
                reason: "principal set contains a blank name".to_string(),
            }
            .into());
        }

        let names = principals.names().collect::<Vec<_>>().join(",");
        let span = tracing::info_span!("impersonation", trace_id = %caller.trace_id, principals = %names);
        let scoped = caller.impersonating(principals);

        debug!(parent: &span, "entering impersonation scope");
        let result = action(scoped).instrument(span.clone()).await;
        debug!(parent: &span, ok = result.is_ok(), "left impersonation scope");
        result
    }
}
