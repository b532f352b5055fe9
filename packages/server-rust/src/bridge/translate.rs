//! Unwrapping of registry-wrapped application failures.

use super::error::BridgeError;

/// Replaces a registry-wrapped application failure with its cause.
///
/// Only recoverable causes are unwrapped. Every other error, including a
/// wrapper without a cause or with a fatal one, is returned as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionTranslator;

impl ExceptionTranslator {
    #[must_use]
    pub fn unwrap(&self, error: BridgeError) -> BridgeError {
        match error {
            BridgeError::WrappedApplication {
                cause: Some(cause), ..
            } if cause.is_recoverable() => BridgeError::Application(cause),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use opbridge_core::messages::{RegistryFault, RemoteException};

    use super::*;
    use crate::bridge::error::{ConnectionError, ImpersonationError};

    fn wrapped(cause: Option<RemoteException>) -> BridgeError {
        BridgeError::WrappedApplication {
            message: "invocation of op failed".to_string(),
            cause,
        }
    }

    #[test]
    fn unwraps_recoverable_cause() {
        let cause = RemoteException::new("Boom", "bad input");
        let out = ExceptionTranslator.unwrap(wrapped(Some(cause.clone())));
        assert_eq!(out, BridgeError::Application(cause));
    }

    #[test]
    fn keeps_nested_cause_chain() {
        let cause = RemoteException::new("Outer", "outer")
            .caused_by(RemoteException::new("Inner", "inner"));
        let out = ExceptionTranslator.unwrap(wrapped(Some(cause)));

        assert_eq!(out.to_string(), "Outer: outer");
        // `Application` is transparent, so its source is the nested cause.
        assert_eq!(
            out.source().map(ToString::to_string),
            Some("Inner: inner".to_string())
        );
        assert!(out.source().and_then(Error::source).is_none());
    }

    #[test]
    fn fatal_cause_stays_wrapped() {
        let err = wrapped(Some(RemoteException::new("Abort", "x").fatal()));
        assert_eq!(ExceptionTranslator.unwrap(err.clone()), err);
    }

    #[test]
    fn wrapper_without_cause_is_unchanged() {
        let err = wrapped(None);
        assert_eq!(ExceptionTranslator.unwrap(err.clone()), err);
    }

    #[test]
    fn other_errors_are_unchanged() {
        let cases = vec![
            BridgeError::invalid_request("empty"),
            BridgeError::Connection(ConnectionError::Closed),
            BridgeError::Registry(RegistryFault::ArgumentCountMismatch {
                operation: "op".to_string(),
                arguments: 1,
                signature: 0,
            }),
            BridgeError::Application(RemoteException::new("A", "b")),
            BridgeError::Impersonation(ImpersonationError::InvalidPrincipal {
                reason: "blank".to_string(),
            }),
        ];
        for err in cases {
            assert_eq!(ExceptionTranslator.unwrap(err.clone()), err);
        }
    }

    #[test]
    fn unwrapping_twice_is_stable() {
        let once = ExceptionTranslator.unwrap(wrapped(Some(RemoteException::new("A", "b"))));
        assert_eq!(ExceptionTranslator.unwrap(once.clone()), once);
    }
}
