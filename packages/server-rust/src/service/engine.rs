//! The engine: owns the registry, resolvers, auth and router strategies,
//! and the dispatch pipeline. Registers resources and dispatches calls.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::Router;
use serde_json::{Map, Value};
use switchyard_core::{Identifier, NamingRules, Request, RequestContext, ResourceKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::audit::{AuditPublisher, TracingAuditPublisher};
use super::auth::{
    AppSecretStore, AuthStrategy, AuthStrategyRegistry, BearerStrategy, PermissionChecker,
    RolePermissionChecker, SignatureStrategy, StaticAppSecretStore,
};
use super::config::EngineConfig;
use super::handler::{
    CallContext, FactoryContext, FactoryParamResolver, HandlerAdapter, HandlerParamResolver,
    ResolveError, ResolverSet,
};
use super::middleware::{DispatchPipeline, Invocation};
use super::operation::{Operation, OperationError, OperationSpec};
use super::policy::{merge, PolicyDefaults};
use super::rate_limit::{MemoryRateLimiter, RateLimiter};
use super::registry::{OperationRegistry, RegistryError};
use super::resource::{Resource, ResourceError, ResourceHeader};
use super::router::{
    RestRouterStrategy, RouteError, RouterStrategies, RouterStrategy, RpcRouterStrategy,
};
use crate::network::AppState;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building the engine or registering operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("cannot adapt handler of {identifier}: {source}")]
    Resolve {
        identifier: Identifier,
        #[source]
        source: ResolveError,
    },
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("{identifier} uses unknown auth strategy {strategy:?}")]
    UnknownAuthStrategy {
        identifier: Identifier,
        strategy: String,
    },
}

// ---------------------------------------------------------------------------
// EngineBuilder
// ---------------------------------------------------------------------------

/// Collects collaborators; anything left unset gets the built-in default.
pub struct EngineBuilder {
    config: EngineConfig,
    rules: NamingRules,
    resolvers: ResolverSet,
    auth_strategies: Vec<Arc<dyn AuthStrategy>>,
    app_secrets: Option<Box<dyn FnOnce(&EngineConfig) -> SignatureStrategy + Send>>,
    permissions: Option<Arc<dyn PermissionChecker>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    audit: Option<Arc<dyn AuditPublisher>>,
    routers: RouterStrategies,
}

impl EngineBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            rules: NamingRules::new(),
            resolvers: ResolverSet::new(),
            auth_strategies: Vec::new(),
            app_secrets: None,
            permissions: None,
            limiter: None,
            audit: None,
            routers: RouterStrategies::new(),
        }
    }

    #[must_use]
    pub fn naming_rules(mut self, rules: NamingRules) -> Self {
        self.rules = rules;
        self
    }

    /// Adds a registration-time resolver. User resolvers take precedence
    /// over the built-ins.
    #[must_use]
    pub fn factory_resolver(mut self, resolver: Arc<dyn FactoryParamResolver>) -> Self {
        self.resolvers.add_factory(resolver);
        self
    }

    /// Adds a request-scoped resolver.
    #[must_use]
    pub fn handler_resolver(mut self, resolver: Arc<dyn HandlerParamResolver>) -> Self {
        self.resolvers.add_handler(resolver);
        self
    }

    /// Adds an auth strategy. A strategy named like a built-in replaces it.
    #[must_use]
    pub fn auth_strategy(mut self, strategy: Arc<dyn AuthStrategy>) -> Self {
        self.auth_strategies.push(strategy);
        self
    }

    /// Secret store for the `signature` strategy. Without one, every app is
    /// unknown.
    #[must_use]
    pub fn app_secrets(mut self, store: impl AppSecretStore + 'static) -> Self {
        self.app_secrets = Some(Box::new(move |config: &EngineConfig| {
            SignatureStrategy::new(store, config.signature.clone())
        }));
        self
    }

    #[must_use]
    pub fn permission_checker(mut self, checker: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = Some(checker);
        self
    }

    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn audit_publisher(mut self, publisher: Arc<dyn AuditPublisher>) -> Self {
        self.audit = Some(publisher);
        self
    }

    /// Adds a router strategy. Adding any replaces the default RPC + REST
    /// pair.
    #[must_use]
    pub fn router_strategy(mut self, strategy: Arc<dyn RouterStrategy>) -> Self {
        self.routers.push(strategy);
        self
    }

    /// Assembles the engine.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::NoStrategy`] or [`RouteError::Ambiguous`] when a
    /// resource kind does not have exactly one router strategy.
    pub fn build(self) -> Result<Engine, EngineError> {
        let Self {
            config,
            rules,
            resolvers,
            auth_strategies,
            app_secrets,
            permissions,
            limiter,
            audit,
            mut routers,
        } = self;

        if routers.is_empty() {
            routers.push(Arc::new(RpcRouterStrategy::new(config.rpc_path.clone())));
            routers.push(Arc::new(RestRouterStrategy::with_rules(
                config.rest_prefix.clone(),
                rules.clone(),
            )));
        }
        routers.validate()?;

        let auth = Arc::new(AuthStrategyRegistry::new());
        auth.register(Arc::new(BearerStrategy::new(&config.bearer)));
        let signature = match app_secrets {
            Some(make) => make(&config),
            None => SignatureStrategy::new(StaticAppSecretStore::new(), config.signature.clone()),
        };
        auth.register(Arc::new(signature));
        for strategy in auth_strategies {
            auth.register(strategy);
        }

        let pipeline = DispatchPipeline::new(
            config.max_concurrent_operations,
            Arc::clone(&auth),
            permissions.unwrap_or_else(|| Arc::new(RolePermissionChecker::default())),
            limiter.unwrap_or_else(|| {
                Arc::new(MemoryRateLimiter::with_purge_interval(
                    config.rate_limit_purge_interval,
                ))
            }),
            audit.unwrap_or_else(|| Arc::new(TracingAuditPublisher)),
        );

        info!(
            auth_strategies = ?auth.names(),
            router_strategies = ?routers.names(),
            "engine built"
        );

        Ok(Engine {
            defaults: config.policy_defaults(),
            config,
            rules,
            registry: Arc::new(OperationRegistry::new()),
            resolvers,
            auth,
            routers,
            pipeline,
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
        })
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("routers", &self.routers)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Registers operations and dispatches calls to them.
///
/// Registration and removal may happen while calls are in flight; a call
/// that has already looked up its operation keeps running it. Once
/// [`stop_accepting`](Self::stop_accepting) is called, new calls fail with
/// `OperationError::ShuttingDown` while started ones run to completion.
pub struct Engine {
    config: EngineConfig,
    defaults: PolicyDefaults,
    rules: NamingRules,
    registry: Arc<OperationRegistry>,
    resolvers: ResolverSet,
    auth: Arc<AuthStrategyRegistry>,
    routers: RouterStrategies,
    pipeline: DispatchPipeline,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
}

/// Counts one dispatch for as long as it lives.
struct DispatchGuard<'a>(&'a AtomicUsize);

impl<'a> DispatchGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Engine {
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rules resources must be built with before registration.
    #[must_use]
    pub fn naming_rules(&self) -> &NamingRules {
        &self.rules
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn auth_strategies(&self) -> &Arc<AuthStrategyRegistry> {
        &self.auth
    }

    #[must_use]
    pub fn default_version(&self) -> &str {
        &self.defaults.version
    }

    /// Dispatches that have started and not yet returned.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Rejects every dispatch that starts from now on.
    pub fn stop_accepting(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(in_flight = self.in_flight(), "engine stopped accepting calls");
        }
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Mounts every router strategy's endpoints.
    #[must_use]
    pub fn mount(&self, router: Router<AppState>) -> Router<AppState> {
        self.routers.setup(router)
    }

    // -- registration -------------------------------------------------------

    /// Registers every operation of a resource at startup.
    ///
    /// All operations are built first; if any of them fails to register or
    /// route, the ones already installed are removed again.
    ///
    /// # Errors
    ///
    /// Returns the first failure: an unknown auth strategy, an unresolvable
    /// handler argument, a duplicate identifier, or a route conflict.
    pub fn register_resource(&self, resource: Resource) -> Result<Vec<Identifier>, EngineError> {
        self.register(resource, false)
    }

    /// Registers a resource after startup (plugins, business events).
    /// Same contract as [`register_resource`](Self::register_resource).
    ///
    /// # Errors
    ///
    /// See [`register_resource`](Self::register_resource).
    pub fn register_dynamic(&self, resource: Resource) -> Result<Vec<Identifier>, EngineError> {
        self.register(resource, true)
    }

    fn register(&self, resource: Resource, dynamic: bool) -> Result<Vec<Identifier>, EngineError> {
        let (header, specs) = resource.into_operations();
        let router = self.routers.select(header.kind)?;

        let operations = specs
            .into_iter()
            .map(|spec| self.build_operation(&header, spec, dynamic).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let mut installed: Vec<Identifier> = Vec::with_capacity(operations.len());
        for operation in operations {
            if let Err(err) = self.install(router.as_ref(), &operation) {
                warn!(
                    resource = %header.name,
                    error = %err,
                    rolled_back = installed.len(),
                    "resource registration failed"
                );
                for identifier in &installed {
                    router.unroute(identifier);
                    self.registry.remove(identifier);
                }
                return Err(err);
            }
            info!(
                identifier = %operation.identifier,
                kind = header.kind.as_str(),
                auth = %operation.auth.strategy,
                timeout_ms = operation.timeout_ms(),
                dynamic,
                "operation registered"
            );
            installed.push(operation.identifier.clone());
        }
        Ok(installed)
    }

    fn build_operation(
        &self,
        header: &ResourceHeader,
        spec: OperationSpec,
        dynamic: bool,
    ) -> Result<Operation, EngineError> {
        let policy = merge(header, &spec, &self.defaults);
        let identifier = Identifier::new(header.name.clone(), spec.action.clone(), policy.version);

        if !self.auth.contains(&policy.auth.strategy) {
            return Err(EngineError::UnknownAuthStrategy {
                identifier,
                strategy: policy.auth.strategy,
            });
        }

        let factory_ctx = FactoryContext {
            identifier: identifier.clone(),
            kind: header.kind,
        };
        let handler = HandlerAdapter::adapt(spec.handler, &factory_ctx, &self.resolvers)
            .map_err(|source| EngineError::Resolve {
                identifier: identifier.clone(),
                source,
            })?;

        Ok(Operation {
            identifier,
            kind: header.kind,
            enable_audit: spec.enable_audit,
            timeout: policy.timeout,
            auth: policy.auth,
            rate_limit: policy.rate_limit,
            perm_token: spec.perm_token,
            handler,
            dynamic,
            meta: spec.meta,
        })
    }

    fn install(
        &self,
        router: &dyn RouterStrategy,
        operation: &Arc<Operation>,
    ) -> Result<(), EngineError> {
        self.registry.register(Arc::clone(operation))?;
        if let Err(err) = router.route(operation) {
            self.registry.remove(&operation.identifier);
            return Err(err.into());
        }
        Ok(())
    }

    /// Removes an operation and its endpoint. Calls already dispatched to it
    /// finish normally.
    pub fn remove_operation(&self, identifier: &Identifier) -> Option<Arc<Operation>> {
        let operation = self.registry.remove(identifier)?;
        if let Ok(router) = self.routers.select(operation.kind) {
            router.unroute(identifier);
        }
        info!(identifier = %identifier, "operation removed");
        Some(operation)
    }

    // -- dispatch -----------------------------------------------------------

    /// Dispatches a request envelope to whatever operation it names.
    ///
    /// # Errors
    ///
    /// `OperationError::NotFound` for unknown identifiers, otherwise the
    /// failure of the pipeline or the handler.
    pub async fn dispatch(
        &self,
        request: Request,
        rc: RequestContext,
    ) -> Result<Value, OperationError> {
        let identifier = request.identifier(self.default_version());
        self.run(None, identifier, request.params, request.meta, rc)
            .await
    }

    /// Dispatches a call that arrived through a router strategy. Operations
    /// of another resource kind are reported as not found.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    pub async fn dispatch_routed(
        &self,
        kind: ResourceKind,
        identifier: Identifier,
        params: Map<String, Value>,
        meta: Map<String, Value>,
        rc: RequestContext,
    ) -> Result<Value, OperationError> {
        self.run(Some(kind), identifier, params, meta, rc).await
    }

    async fn run(
        &self,
        kind: Option<ResourceKind>,
        identifier: Identifier,
        params: Map<String, Value>,
        meta: Map<String, Value>,
        rc: RequestContext,
    ) -> Result<Value, OperationError> {
        // Counted before the accepting check: a drain that reads zero has
        // seen every admitted call finish.
        let _counted = DispatchGuard::enter(&self.in_flight);
        if !self.is_accepting() {
            return Err(OperationError::ShuttingDown);
        }

        let Some(operation) = self
            .registry
            .lookup(&identifier)
            .filter(|op| kind.is_none_or(|kind| op.kind == kind))
        else {
            debug!(identifier = %identifier, "no such operation");
            return Err(OperationError::NotFound { identifier });
        };

        // Dropping this future (caller went away) cancels the token.
        let token = CancellationToken::new();
        let _cancel_on_drop = token.clone().drop_guard();

        debug!(
            identifier = %operation.identifier,
            request_id = %rc.request_id,
            "dispatching"
        );
        let ctx = CallContext::new(identifier, params, meta, rc, token);
        self.pipeline.dispatch(Invocation { operation, ctx }).await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("operations", &self.registry.len())
            .field("auth", &self.auth)
            .field("routers", &self.routers)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
