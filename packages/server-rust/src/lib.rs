//! `Switchyard` Server: operation registry, handler resolution, auth and
//! router strategies, and the axum HTTP transport.

pub mod network;
pub mod service;

pub use network::{NetworkConfig, NetworkModule};
pub use service::{
    Engine, EngineBuilder, EngineConfig, EngineError, Handler, OperationError, OperationSpec,
    Resource,
};
