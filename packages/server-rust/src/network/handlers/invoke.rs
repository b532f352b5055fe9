//! Invocation endpoints.
//!
//! `POST /api/invoke` takes `{"operationName", "arguments"?, "signature"?}`
//! and returns the operation's result as JSON. The same handler also serves
//! `POST /api/jmx/invoke`, and both accept the older `methodName` and
//! `argumentTypes` field names. `POST /api/test` echoes a plain-text body
//! through `testStringArgument`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use opbridge_core::Value;
use serde::Deserialize;

use super::caller::Caller;
use super::error::ApiError;
use super::AppState;
use crate::bridge::{BridgeError, OperationRequest};
use crate::registry::echo::TEST_STRING_ARGUMENT;

/// Body of `POST /api/invoke`. Absent arrays mean no arguments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeBody {
    #[serde(alias = "methodName")]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
    #[serde(default, alias = "argumentTypes")]
    pub signature: Vec<String>,
}

pub async fn invoke_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    body: Result<Json<InvokeBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let _guard = state.shutdown.in_flight_guard();

    let Json(body) = body.map_err(|rejection| BridgeError::InvalidRequest {
        reason: rejection.body_text(),
    })?;
    let operation = body
        .operation_name
        .ok_or_else(|| BridgeError::InvalidRequest {
            reason: "operationName is required".to_string(),
        })?;
    let arguments = body.arguments.into_iter().map(Value::from).collect();

    let value = state
        .invoker
        .invoke_as(&caller, OperationRequest::new(operation, arguments, body.signature))
        .await?;
    Ok(Json(value.into()))
}

pub async fn test_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    input: String,
) -> Result<String, ApiError> {
    let _guard = state.shutdown.in_flight_guard();

    let request = OperationRequest::new(
        TEST_STRING_ARGUMENT,
        vec![Value::String(input)],
        vec!["string".to_string()],
    );
    match state.invoker.invoke_as(&caller, request).await? {
        Value::String(text) => Ok(text),
        other => Ok(serde_json::Value::from(other).to_string()),
    }
}
