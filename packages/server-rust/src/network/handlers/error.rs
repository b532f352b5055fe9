//! Maps [`BridgeError`] onto HTTP responses.

use std::error::Error as _;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use opbridge_core::messages::RegistryFault;
use serde_json::json;
use tracing::warn;

use crate::bridge::BridgeError;

/// A failed invocation, rendered as `{"error", "message", "causes"}`.
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BridgeError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            BridgeError::Registry(
                RegistryFault::ResourceNotFound { .. } | RegistryFault::OperationNotFound { .. },
            ) => StatusCode::NOT_FOUND,
            BridgeError::Registry(
                RegistryFault::ArgumentCountMismatch { .. } | RegistryFault::ArgumentTypeMismatch { .. },
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            BridgeError::Connection(_) => StatusCode::BAD_GATEWAY,
            BridgeError::WrappedApplication { .. }
            | BridgeError::Application(_)
            | BridgeError::Impersonation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Messages of the error's source chain, outermost first.
    #[must_use]
    pub fn causes(&self) -> Vec<String> {
        let mut causes = Vec::new();
        let mut next = self.0.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }
        causes
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(kind = self.0.kind(), error = %self.0, "invocation failed");
        }
        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
            "causes": self.causes(),
        });
        (status, Json(body)).into_response()
    }
}
