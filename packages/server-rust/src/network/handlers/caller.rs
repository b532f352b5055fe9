//! Builds the [`CallerContext`] each request invokes with.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use opbridge_core::{CallerContext, Principal};
use uuid::Uuid;

use crate::network::middleware::REQUEST_ID_HEADER;

/// Identity established by an outer authentication layer.
///
/// No such layer ships with the bridge. One that inserts this extension into
/// the request makes the principal available to derived identity mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal(pub Principal);

/// Extracts the caller of a request: its `X-Request-Id` as trace id (a fresh
/// UUID when the header is missing) and the [`AuthenticatedPrincipal`]
/// extension, if present.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerContext);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trace_id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
        let mut ctx = CallerContext::new(trace_id);
        if let Some(AuthenticatedPrincipal(principal)) = parts.extensions.get::<AuthenticatedPrincipal>() {
            ctx = ctx.with_authenticated(principal.clone());
        }
        Ok(Self(ctx))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(request: Request<()>) -> CallerContext {
        let (mut parts, ()) = request.into_parts();
        Caller::from_request_parts(&mut parts, &()).await.unwrap().0
    }

    #[tokio::test]
    async fn anonymous_without_headers_or_extension() {
        let ctx = extract(Request::new(())).await;
        assert!(Uuid::parse_str(&ctx.trace_id).is_ok());
        assert!(ctx.authenticated.is_none());
    }

    #[tokio::test]
    async fn reads_request_id_and_principal() {
        let principal = Principal {
            id: "alice".to_string(),
            roles: vec!["ops".to_string()],
        };
        let mut request = Request::builder()
            .header(REQUEST_ID_HEADER, "req-42")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(AuthenticatedPrincipal(principal.clone()));

        let ctx = extract(request).await;
        assert_eq!(ctx.trace_id, "req-42");
        assert_eq!(ctx.authenticated, Some(principal));
    }
}
