use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use switchyard_core::{Identifier, Principal, RequestContext};
use tokio_util::sync::CancellationToken;

/// Everything a handler (and a request-scoped resolver) can see about one
/// call.
///
/// Cloning is cheap: payloads are shared. The principal slot is shared
/// between clones so that layers outside the auth layer (audit, metrics)
/// observe the authenticated identity.
#[derive(Debug, Clone)]
pub struct CallContext {
    identifier: Identifier,
    params: Arc<Map<String, Value>>,
    meta: Arc<Map<String, Value>>,
    request: Arc<RequestContext>,
    principal: Arc<ArcSwap<Principal>>,
    cancel: CancellationToken,
}

impl CallContext {
    /// Creates a context with an anonymous principal.
    #[must_use]
    pub fn new(
        identifier: Identifier,
        params: Map<String, Value>,
        meta: Map<String, Value>,
        request: RequestContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            identifier,
            params: Arc::new(params),
            meta: Arc::new(meta),
            request: Arc::new(request),
            principal: Arc::new(ArcSwap::from_pointee(Principal::anonymous())),
            cancel,
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    #[must_use]
    pub fn meta(&self) -> &Map<String, Value> {
        &self.meta
    }

    #[must_use]
    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    /// The caller identity. Anonymous until the auth layer has run.
    #[must_use]
    pub fn principal(&self) -> Arc<Principal> {
        self.principal.load_full()
    }

    pub(crate) fn set_principal(&self, principal: Principal) {
        self.principal.store(Arc::new(principal));
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::PrincipalKind;

    use super::*;

    fn ctx() -> CallContext {
        CallContext::new(
            Identifier::new("user", "get", "v1"),
            Map::new(),
            Map::new(),
            RequestContext::new("req-1"),
            CancellationToken::new(),
        )
    }

    #[test]
    fn starts_anonymous() {
        assert!(ctx().principal().is_anonymous());
    }

    #[test]
    fn principal_is_shared_between_clones() {
        let a = ctx();
        let b = a.clone();
        b.set_principal(Principal::new(PrincipalKind::User, "u1", "Alice"));
        assert_eq!(a.principal().id, "u1");
    }

    #[test]
    fn cancellation_is_observed() {
        let c = ctx();
        assert!(!c.is_cancelled());
        c.cancellation().cancel();
        assert!(c.is_cancelled());
    }
}
