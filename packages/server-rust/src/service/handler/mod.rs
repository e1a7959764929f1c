//! Handler declaration, parameter injection, and adaptation.
//!
//! A [`Handler`] is one of a closed set of variants:
//!
//! - [`Handler::Raw`]: receives the [`CallContext`] directly.
//! - [`Handler::Typed`]: declares its arguments as [`FromParam`] types; the
//!   engine builds a [`ResolutionPlan`] once at registration and decodes or
//!   resolves each argument per call.
//!
//! [`HandlerAdapter::adapt`] turns either variant into an [`AdaptedHandler`]
//! with the fixed shape `CallContext -> Future<Result<Value, OperationError>>`
//! so nothing downstream branches on handler shape again.

pub mod context;
pub mod param;
pub mod resolver;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

pub use context::CallContext;
pub use param::{
    FromParam, Inject, Meta, ParamSlot, ParamType, ParamValue, Params, ResolvedValue,
    SharedValue,
};
pub use resolver::{
    FactoryContext, FactoryParamResolver, FactoryResolverFn, HandlerParamResolver,
    HandlerResolverFn, OperationLogger, ResolutionPlan, ResolveError, ResolverSet,
};

use super::operation::OperationError;

/// Boxed future returned by every adapted handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, OperationError>> + Send>>;

/// The uniform callable stored on an `Operation`.
pub type AdaptedHandler = Arc<dyn Fn(CallContext) -> HandlerFuture + Send + Sync>;

type TypedInvoker = Arc<dyn Fn(Vec<ResolvedValue>) -> HandlerFuture + Send + Sync>;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// A business handler as declared by a resource.
#[derive(Clone)]
pub enum Handler {
    Raw(AdaptedHandler),
    Typed {
        slots: Vec<ParamSlot>,
        invoke: TypedInvoker,
    },
}

impl Handler {
    /// Wraps an async function whose arguments are all [`FromParam`] types.
    pub fn from_fn<F, Args>(f: F) -> Self
    where
        F: HandlerFunc<Args>,
    {
        let f = Arc::new(f);
        Self::Typed {
            slots: F::slots(),
            invoke: Arc::new(move |args| HandlerFunc::<Args>::invoke(&*f, args)),
        }
    }

    /// Wraps an async function that takes the whole call context.
    pub fn raw<F, Fut, R>(f: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, OperationError>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        Self::Raw(Arc::new(move |ctx| {
            let fut = f(ctx);
            Box::pin(async move { to_value(fut.await?) })
        }))
    }

    /// Declared argument slots; empty for raw handlers.
    #[must_use]
    pub fn slots(&self) -> &[ParamSlot] {
        match self {
            Self::Raw(_) => &[],
            Self::Typed { slots, .. } => slots,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(_) => f.write_str("Handler::Raw"),
            Self::Typed { slots, .. } => f.debug_tuple("Handler::Typed").field(slots).finish(),
        }
    }
}

fn to_value<R: Serialize>(output: R) -> Result<Value, OperationError> {
    serde_json::to_value(output).map_err(|err| OperationError::Internal(err.into()))
}

// ---------------------------------------------------------------------------
// HandlerFunc
// ---------------------------------------------------------------------------

/// Async functions usable as typed handlers. Implemented for functions of
/// zero to eight [`FromParam`] arguments returning
/// `Result<impl Serialize, OperationError>`.
pub trait HandlerFunc<Args>: Send + Sync + 'static {
    fn slots() -> Vec<ParamSlot>;

    fn invoke(&self, args: Vec<ResolvedValue>) -> HandlerFuture;
}

macro_rules! impl_handler_func {
    ($($ty:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, Fut, R, $($ty,)*> HandlerFunc<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R, OperationError>> + Send + 'static,
            R: Serialize + Send + 'static,
            $($ty: FromParam,)*
        {
            fn slots() -> Vec<ParamSlot> {
                vec![$($ty::slot()),*]
            }

            fn invoke(&self, args: Vec<ResolvedValue>) -> HandlerFuture {
                let mut args = args.into_iter();
                $(
                    let $ty = match args.next() {
                        Some(value) => match $ty::from_value(value) {
                            Ok(value) => value,
                            Err(err) => return Box::pin(async move { Err(err.into()) }),
                        },
                        None => {
                            return Box::pin(async {
                                Err(OperationError::Internal(anyhow::anyhow!(
                                    "resolution plan produced too few arguments"
                                )))
                            })
                        }
                    };
                )*
                let fut = (self)($($ty),*);
                Box::pin(async move { to_value(fut.await?) })
            }
        }
    };
}

impl_handler_func!();
impl_handler_func!(T1);
impl_handler_func!(T1, T2);
impl_handler_func!(T1, T2, T3);
impl_handler_func!(T1, T2, T3, T4);
impl_handler_func!(T1, T2, T3, T4, T5);
impl_handler_func!(T1, T2, T3, T4, T5, T6);
impl_handler_func!(T1, T2, T3, T4, T5, T6, T7);
impl_handler_func!(T1, T2, T3, T4, T5, T6, T7, T8);

// ---------------------------------------------------------------------------
// HandlerAdapter
// ---------------------------------------------------------------------------

/// Normalizes handlers into [`AdaptedHandler`]s.
pub struct HandlerAdapter;

impl HandlerAdapter {
    /// Builds the resolution plan for `handler` and returns the uniform
    /// callable.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::Unresolvable` when an argument type has no
    /// resolver, or the error of a failing factory resolver.
    pub fn adapt(
        handler: Handler,
        factory_ctx: &FactoryContext,
        resolvers: &ResolverSet,
    ) -> Result<AdaptedHandler, ResolveError> {
        match handler {
            Handler::Raw(f) => Ok(f),
            Handler::Typed { slots, invoke } => {
                let plan = Arc::new(ResolutionPlan::build(&slots, factory_ctx, resolvers)?);
                Ok(Arc::new(move |ctx: CallContext| {
                    let plan = Arc::clone(&plan);
                    let invoke = Arc::clone(&invoke);
                    Box::pin(async move {
                        let args = plan.resolve(&ctx).await?;
                        invoke(args).await
                    })
                }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
