//! Parameter resolvers and the per-operation resolution plan.
//!
//! Two resolver kinds exist:
//!
//! - [`FactoryParamResolver`]: runs once, when the operation is registered.
//!   Its value is shared by every call (services, loggers).
//! - [`HandlerParamResolver`]: runs once per request against the live
//!   [`CallContext`] (principal, pagination, cancellation).
//!
//! Lookup order is user factory, user handler, built-in factory, built-in
//! handler: the first resolver whose type tag matches wins, so a
//! user-registered resolver shadows a built-in for the same type.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::{Identifier, Pagination, ResourceKind};
use tracing::Span;

use super::context::CallContext;
use super::param::{Decoder, ParamSlot, ParamType, ParamValue, ResolvedValue, SharedValue};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building or executing a resolution plan.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("no resolver registered for handler parameter type {type_name}")]
    Unresolvable { type_name: &'static str },
    #[error("failed to decode {source_name} into {type_name}: {message}")]
    Decode {
        source_name: &'static str,
        type_name: &'static str,
        message: String,
    },
    #[error("resolver produced a value that is not a {type_name}")]
    TypeMismatch { type_name: &'static str },
    #[error("failed to resolve {type_name}: {message}")]
    Failed {
        type_name: &'static str,
        message: String,
    },
    #[error("request cancelled during parameter resolution")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Resolver traits
// ---------------------------------------------------------------------------

/// What a factory resolver knows: the operation being registered.
#[derive(Debug, Clone)]
pub struct FactoryContext {
    pub identifier: Identifier,
    pub kind: ResourceKind,
}

/// Supplies a parameter once, at registration time.
pub trait FactoryParamResolver: Send + Sync {
    fn param_type(&self) -> ParamType;

    /// # Errors
    ///
    /// Fails the registration of the operation.
    fn resolve(&self, ctx: &FactoryContext) -> Result<SharedValue, ResolveError>;
}

/// Supplies a parameter per request.
#[async_trait]
pub trait HandlerParamResolver: Send + Sync {
    fn param_type(&self) -> ParamType;

    /// # Errors
    ///
    /// Fails the request with a client-fault error.
    async fn resolve(&self, ctx: &CallContext) -> Result<ParamValue, ResolveError>;
}

/// Factory resolver backed by a closure.
pub struct FactoryResolverFn<T, F> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> FactoryResolverFn<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(&FactoryContext) -> Result<T, ResolveError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<T, F> FactoryParamResolver for FactoryResolverFn<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(&FactoryContext) -> Result<T, ResolveError> + Send + Sync + 'static,
{
    fn param_type(&self) -> ParamType {
        ParamType::of::<T>()
    }

    fn resolve(&self, ctx: &FactoryContext) -> Result<SharedValue, ResolveError> {
        (self.f)(ctx).map(|value| Arc::new(value) as SharedValue)
    }
}

/// Request-scoped resolver backed by a synchronous closure.
pub struct HandlerResolverFn<T, F> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> HandlerResolverFn<T, F>
where
    T: Send + 'static,
    F: Fn(&CallContext) -> Result<T, ResolveError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> HandlerParamResolver for HandlerResolverFn<T, F>
where
    T: Send + 'static,
    F: Fn(&CallContext) -> Result<T, ResolveError> + Send + Sync + 'static,
{
    fn param_type(&self) -> ParamType {
        ParamType::of::<T>()
    }

    async fn resolve(&self, ctx: &CallContext) -> Result<ParamValue, ResolveError> {
        (self.f)(ctx).map(|value| Box::new(value) as ParamValue)
    }
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

/// Tracing span scoped to one operation, built at registration.
#[derive(Debug, Clone)]
pub struct OperationLogger {
    identifier: Arc<Identifier>,
    span: Span,
}

impl OperationLogger {
    #[must_use]
    pub fn new(identifier: Identifier) -> Self {
        let span = tracing::info_span!(
            "handler",
            resource = %identifier.resource,
            action = %identifier.action,
            version = %identifier.version,
        );
        Self {
            identifier: Arc::new(identifier),
            span,
        }
    }

    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    #[must_use]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }
}

fn factory<T, F>(f: F) -> Arc<dyn FactoryParamResolver>
where
    T: Send + Sync + 'static,
    F: Fn(&FactoryContext) -> Result<T, ResolveError> + Send + Sync + 'static,
{
    Arc::new(FactoryResolverFn::new(f))
}

fn per_request<T, F>(f: F) -> Arc<dyn HandlerParamResolver>
where
    T: Send + 'static,
    F: Fn(&CallContext) -> Result<T, ResolveError> + Send + Sync + 'static,
{
    Arc::new(HandlerResolverFn::new(f))
}

fn builtin_factory() -> Vec<Arc<dyn FactoryParamResolver>> {
    vec![factory(|ctx: &FactoryContext| {
        Ok(OperationLogger::new(ctx.identifier.clone()))
    })]
}

fn builtin_handler() -> Vec<Arc<dyn HandlerParamResolver>> {
    vec![
        per_request(|ctx: &CallContext| Ok(ctx.principal().as_ref().clone())),
        per_request(|ctx: &CallContext| Ok(ctx.clone())),
        per_request(|ctx: &CallContext| Ok(ctx.identifier().clone())),
        per_request(|ctx: &CallContext| Ok(Pagination::from_meta(ctx.meta()))),
        per_request(|ctx: &CallContext| Ok(ctx.cancellation().clone())),
    ]
}

// ---------------------------------------------------------------------------
// ResolverSet
// ---------------------------------------------------------------------------

/// Ordered collection of resolvers consulted when a resolution plan is built.
pub struct ResolverSet {
    user_factory: Vec<Arc<dyn FactoryParamResolver>>,
    user_handler: Vec<Arc<dyn HandlerParamResolver>>,
    builtin_factory: Vec<Arc<dyn FactoryParamResolver>>,
    builtin_handler: Vec<Arc<dyn HandlerParamResolver>>,
}

enum ResolverSource {
    Factory(Arc<dyn FactoryParamResolver>),
    Handler(Arc<dyn HandlerParamResolver>),
}

impl ResolverSet {
    /// Creates a set containing only the built-in resolvers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            user_factory: Vec::new(),
            user_handler: Vec::new(),
            builtin_factory: builtin_factory(),
            builtin_handler: builtin_handler(),
        }
    }

    /// Adds a user factory resolver. Later additions do not shadow earlier
    /// ones for the same type.
    pub fn add_factory(&mut self, resolver: Arc<dyn FactoryParamResolver>) {
        self.user_factory.push(resolver);
    }

    /// Adds a user request-scoped resolver.
    pub fn add_handler(&mut self, resolver: Arc<dyn HandlerParamResolver>) {
        self.user_handler.push(resolver);
    }

    fn find(&self, ty: ParamType) -> Option<ResolverSource> {
        let factory = |list: &[Arc<dyn FactoryParamResolver>]| {
            list.iter()
                .find(|r| r.param_type() == ty)
                .map(|r| ResolverSource::Factory(Arc::clone(r)))
        };
        let handler = |list: &[Arc<dyn HandlerParamResolver>]| {
            list.iter()
                .find(|r| r.param_type() == ty)
                .map(|r| ResolverSource::Handler(Arc::clone(r)))
        };

        factory(&self.user_factory)
            .or_else(|| handler(&self.user_handler))
            .or_else(|| factory(&self.builtin_factory))
            .or_else(|| handler(&self.builtin_handler))
    }
}

impl Default for ResolverSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResolverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverSet")
            .field("user_factory", &self.user_factory.len())
            .field("user_handler", &self.user_handler.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ResolutionPlan
// ---------------------------------------------------------------------------

enum PlanStep {
    Params(Decoder),
    Meta(Decoder),
    Shared(SharedValue),
    Request(Arc<dyn HandlerParamResolver>),
}

/// Fixed, ordered list of steps producing a handler's arguments.
///
/// Built once per operation. Factory values are resolved while building, so
/// the per-request path is a plain sequence of decodes and resolver calls.
pub struct ResolutionPlan {
    steps: Vec<PlanStep>,
}

impl ResolutionPlan {
    /// Matches every slot against the resolver set.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::Unresolvable` for the first slot no resolver
    /// claims, or the error of a failing factory resolver.
    pub fn build(
        slots: &[ParamSlot],
        factory_ctx: &FactoryContext,
        resolvers: &ResolverSet,
    ) -> Result<Self, ResolveError> {
        let mut steps = Vec::with_capacity(slots.len());
        for slot in slots {
            let step = match *slot {
                ParamSlot::Params { decode, .. } => PlanStep::Params(decode),
                ParamSlot::Meta { decode, .. } => PlanStep::Meta(decode),
                ParamSlot::Typed(ty) => match resolvers.find(ty) {
                    Some(ResolverSource::Factory(resolver)) => {
                        PlanStep::Shared(resolver.resolve(factory_ctx)?)
                    }
                    Some(ResolverSource::Handler(resolver)) => PlanStep::Request(resolver),
                    None => {
                        return Err(ResolveError::Unresolvable {
                            type_name: ty.name(),
                        })
                    }
                },
            };
            steps.push(step);
        }
        Ok(Self { steps })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Produces the arguments for one call, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::Cancelled` as soon as the call is cancelled,
    /// or the first decode/resolver failure.
    pub async fn resolve(&self, ctx: &CallContext) -> Result<Vec<ResolvedValue>, ResolveError> {
        let mut values = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if ctx.is_cancelled() {
                return Err(ResolveError::Cancelled);
            }
            let value = match step {
                PlanStep::Params(decode) => ResolvedValue::Owned(decode(ctx.params())?),
                PlanStep::Meta(decode) => ResolvedValue::Owned(decode(ctx.meta())?),
                PlanStep::Shared(value) => ResolvedValue::Shared(Arc::clone(value)),
                PlanStep::Request(resolver) => {
                    let token = ctx.cancellation().clone();
                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Err(ResolveError::Cancelled),
                        value = resolver.resolve(ctx) => ResolvedValue::Owned(value?),
                    }
                }
            };
            values.push(value);
        }
        Ok(values)
    }
}

impl fmt::Debug for ResolutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionPlan")
            .field("steps", &self.steps.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use switchyard_core::{Principal, PrincipalKind, RequestContext};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::service::handler::param::{FromParam, Inject, Params};

    fn factory_ctx() -> FactoryContext {
        FactoryContext {
            identifier: Identifier::new("user", "get", "v1"),
            kind: ResourceKind::Rpc,
        }
    }

    fn call_ctx() -> CallContext {
        CallContext::new(
            Identifier::new("user", "get", "v1"),
            Map::new(),
            Map::new(),
            RequestContext::new("r"),
            CancellationToken::new(),
        )
    }

    #[derive(Debug, Clone)]
    struct UserService {
        name: &'static str,
    }

    #[test]
    fn unknown_type_is_unresolvable() {
        let slots = [Inject::<UserService>::slot()];
        let err = ResolutionPlan::build(&slots, &factory_ctx(), &ResolverSet::new()).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Unresolvable { type_name } if type_name.contains("UserService")
        ));
    }

    #[tokio::test]
    async fn factory_values_are_resolved_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut set = ResolverSet::new();
        set.add_factory(Arc::new(FactoryResolverFn::new(move |_ctx: &FactoryContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(UserService { name: "users" })
        })));

        let plan =
            ResolutionPlan::build(&[Inject::<UserService>::slot()], &factory_ctx(), &set).unwrap();
        for _ in 0..3 {
            let mut values = plan.resolve(&call_ctx()).await.unwrap();
            let Inject(svc) = Inject::<UserService>::from_value(values.remove(0)).unwrap();
            assert_eq!(svc.name, "users");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn user_resolvers_shadow_builtins() {
        let mut set = ResolverSet::new();
        set.add_handler(Arc::new(HandlerResolverFn::new(|_ctx: &CallContext| {
            Ok(Principal::new(PrincipalKind::System, "override", "Override"))
        })));

        let plan = ResolutionPlan::build(&[Principal::slot()], &factory_ctx(), &set).unwrap();
        let mut values = plan.resolve(&call_ctx()).await.unwrap();
        let principal = Principal::from_value(values.remove(0)).unwrap();
        assert_eq!(principal.id, "override");
    }

    #[tokio::test]
    async fn builtins_cover_request_scoped_types() {
        let slots = [
            Principal::slot(),
            CallContext::slot(),
            Identifier::slot(),
            Pagination::slot(),
            CancellationToken::slot(),
            OperationLogger::slot(),
        ];
        let plan = ResolutionPlan::build(&slots, &factory_ctx(), &ResolverSet::new()).unwrap();
        assert_eq!(plan.len(), 6);
        let values = plan.resolve(&call_ctx()).await.unwrap();
        assert_eq!(values.len(), 6);
    }

    #[tokio::test]
    async fn params_decode_errors_surface_at_request_time() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            id: u64,
        }

        let plan = ResolutionPlan::build(
            &[Params::<Needs>::slot()],
            &factory_ctx(),
            &ResolverSet::new(),
        )
        .unwrap();
        let err = plan.resolve(&call_ctx()).await.err().unwrap();
        assert!(matches!(err, ResolveError::Decode { .. }));
    }

    #[tokio::test]
    async fn cancelled_calls_stop_resolving() {
        let plan =
            ResolutionPlan::build(&[Principal::slot()], &factory_ctx(), &ResolverSet::new())
                .unwrap();
        let ctx = call_ctx();
        ctx.cancellation().cancel();
        let err = plan.resolve(&ctx).await.err().unwrap();
        assert!(matches!(err, ResolveError::Cancelled));
    }
}
