use crate::types::{Principal, PrincipalSet};

/// Per-call context carrying caller identity and tracing information.
///
/// Threaded explicitly through every invocation path instead of living in
/// thread- or task-local state. An impersonation scope never mutates a
/// context; it derives a new one with [`CallerContext::impersonating`], so the
/// outer context keeps its identity on every exit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    /// Trace identifier for log correlation (the HTTP request id when present).
    pub trace_id: String,
    /// Principal authenticated by an outer layer, if any.
    pub authenticated: Option<Principal>,
    principals: Option<PrincipalSet>,
}

impl CallerContext {
    /// Creates a context with no identity.
    #[must_use]
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            authenticated: None,
            principals: None,
        }
    }

    /// Context for calls that originate outside any request.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new("-")
    }

    /// Attaches an already-authenticated principal.
    #[must_use]
    pub fn with_authenticated(mut self, principal: Principal) -> Self {
        self.authenticated = Some(principal);
        self
    }

    /// The identity "current" for this call: the principal set of the
    /// innermost impersonation scope, or `None` outside any scope.
    #[must_use]
    pub fn principals(&self) -> Option<&PrincipalSet> {
        self.principals.as_ref()
    }

    /// Derives a child context whose current identity is `principals`.
    #[must_use]
    pub fn impersonating(&self, principals: PrincipalSet) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            authenticated: self.authenticated.clone(),
            principals: Some(principals),
        }
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_has_no_identity() {
        let ctx = CallerContext::new("req-1");
        assert_eq!(ctx.trace_id, "req-1");
        assert!(ctx.principals().is_none());
        assert!(ctx.authenticated.is_none());
    }

    #[test]
    fn impersonating_leaves_parent_untouched() {
        let outer = CallerContext::new("req-2");
        let inner = outer.impersonating(PrincipalSet::single("svc"));

        assert_eq!(inner.principals(), Some(&PrincipalSet::single("svc")));
        assert_eq!(inner.trace_id, "req-2");
        assert!(outer.principals().is_none());
    }

    #[test]
    fn nested_impersonation_replaces_identity() {
        let outer = CallerContext::anonymous().impersonating(PrincipalSet::single("a"));
        let inner = outer.impersonating(PrincipalSet::single("b"));
        assert_eq!(inner.principals(), Some(&PrincipalSet::single("b")));
        assert_eq!(outer.principals(), Some(&PrincipalSet::single("a")));
    }
}
