//! Operation registry and dispatch engine.
//!
//! 1. **Resources** (`resource`): declarative, validated groups of operations
//! 2. **Handlers** (`handler`): parameter injection and handler adaptation
//! 3. **Policy** (`policy`): merges resource, operation, and engine settings
//! 4. **Registry** (`registry`): concurrent identifier -> operation map
//! 5. **Routers** (`router`): bind operations to RPC and REST endpoints
//! 6. **Middleware** (`middleware`): Tower layers around every dispatch
//! 7. **Engine** (`engine`): ties the above together

pub mod audit;
pub mod auth;
pub mod config;
pub mod engine;
pub mod handler;
pub mod middleware;
pub mod operation;
pub mod policy;
pub mod rate_limit;
pub mod registry;
pub mod resource;
pub mod router;

// Re-export key types for convenient access.
pub use audit::{AuditEvent, AuditPublisher, ChannelAuditPublisher, TracingAuditPublisher};
pub use auth::{AuthError, AuthStrategy, AuthStrategyRegistry, PermissionChecker};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, EngineError};
pub use handler::{CallContext, Handler, Inject, Meta, Params};
pub use operation::{ErrorKind, Operation, OperationError, OperationSpec};
pub use policy::PolicyDefaults;
pub use rate_limit::{MemoryRateLimiter, RateLimiter};
pub use registry::{OperationRegistry, RegistryError};
pub use resource::{Resource, ResourceError};
pub use router::{RouteError, RouterStrategy};
