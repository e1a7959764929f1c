//! Switchyard server binary.
//!
//! Parses configuration from flags and `SWITCHYARD_*` environment variables,
//! registers the built-in system resources, and serves until Ctrl-C. Any
//! resource that fails to register aborts startup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use switchyard_core::{AuthConfig, Identifier, Principal};
use switchyard_server::network::{NetworkConfig, NetworkModule};
use switchyard_server::service::auth::BearerConfig;
use switchyard_server::service::{
    Engine, EngineConfig, Handler, OperationError, OperationSpec, Params, Resource,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Switchyard server command line arguments.
#[derive(Parser, Debug)]
#[command(name = "switchyard-server")]
#[command(about = "Operation registry and dispatch server")]
struct Args {
    /// Bind address.
    #[arg(long, env = "SWITCHYARD_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port (0 picks a free one).
    #[arg(long, env = "SWITCHYARD_PORT", default_value_t = 8080)]
    port: u16,

    /// Allowed CORS origins, comma separated.
    #[arg(long, env = "SWITCHYARD_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Path of the RPC endpoint.
    #[arg(long, env = "SWITCHYARD_RPC_PATH", default_value = "/api")]
    rpc_path: String,

    /// Mount prefix of REST routes.
    #[arg(long, env = "SWITCHYARD_REST_PREFIX", default_value = "/api")]
    rest_prefix: String,

    /// Timeout for operations that do not declare one, in seconds.
    #[arg(long, env = "SWITCHYARD_DEFAULT_TIMEOUT_SECS", default_value_t = 30)]
    default_timeout_secs: u64,

    /// Concurrent dispatches before requests are shed.
    #[arg(long, env = "SWITCHYARD_MAX_CONCURRENT", default_value_t = 1000)]
    max_concurrent: u32,

    /// HS256 secret for bearer tokens. Bearer-protected operations reject
    /// every call while this is empty.
    #[arg(long, env = "SWITCHYARD_JWT_SECRET", default_value = "", hide_env_values = true)]
    jwt_secret: String,

    #[arg(long, env = "SWITCHYARD_JWT_ISSUER")]
    jwt_issuer: Option<String>,

    #[arg(long, env = "SWITCHYARD_JWT_AUDIENCE")]
    jwt_audience: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "SWITCHYARD_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_timeout: Duration::from_secs(self.default_timeout_secs),
            max_concurrent_operations: self.max_concurrent,
            rpc_path: self.rpc_path.clone(),
            rest_prefix: self.rest_prefix.clone(),
            bearer: BearerConfig {
                secret: self.jwt_secret.clone(),
                issuer: self.jwt_issuer.clone(),
                audience: self.jwt_audience.clone(),
                leeway_secs: 30,
            },
            ..EngineConfig::default()
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
            ..NetworkConfig::default()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    id: String,
}

/// System resources every deployment exposes.
fn system_resources(engine: &Engine) -> anyhow::Result<Vec<Resource>> {
    let rules = engine.naming_rules();

    let rpc = Resource::rpc("sys")
        .operation(
            OperationSpec::new(
                "ping",
                Handler::from_fn(|| async { Ok::<_, OperationError>("pong") }),
            )
            .public(),
        )
        .operation(OperationSpec::new(
            "whoami",
            Handler::from_fn(|principal: Principal| async move {
                Ok::<_, OperationError>(principal)
            }),
        ))
        .build(rules)?;

    let rest = Resource::rest("sys/user")
        .version("v1")
        .auth(AuthConfig::none())
        .operation(OperationSpec::new(
            "get",
            Handler::from_fn(|Params(query): Params<UserQuery>, id: Identifier| async move {
                Ok::<_, OperationError>(json!({ "id": query.id, "served_by": id.to_string() }))
            }),
        ))
        .build(rules)?;

    Ok(vec![rpc, rest])
}

async fn run(args: Args) -> anyhow::Result<()> {
    let engine = Engine::builder(args.engine_config())
        .build()
        .context("failed to build engine")?;
    let engine = Arc::new(engine);

    for resource in system_resources(&engine)? {
        engine
            .register_resource(resource)
            .context("failed to register startup resource")?;
    }

    let mut network = NetworkModule::new(args.network_config(), Arc::clone(&engine));
    let port = network.start().await?;
    info!(port, operations = engine.registry().len(), "switchyard ready");

    network
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Err(err) = run(args).await {
        error!("server failed: {err:#}");
        std::process::exit(1);
    }
}
