//! HTTP transport: configuration, middleware, health endpoints, and the
//! server lifecycle.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::*;
