//! `Switchyard` Core: operation identifiers, naming grammar, principals, and the wire envelope.

pub mod context;
pub mod identifier;
pub mod messages;
pub mod naming;
pub mod types;

pub use context::RequestContext;
pub use identifier::Identifier;
pub use messages::{Request, Response};
pub use naming::{Casing, NamingError, NamingRules, RestAction, RestVerb};
pub use types::{
    AuthConfig, Pagination, Principal, PrincipalKind, RateLimitConfig, ResourceKind,
};
