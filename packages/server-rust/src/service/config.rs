use std::time::Duration;

use switchyard_core::AuthConfig;

use super::auth::{BearerConfig, SignatureConfig};
use super::policy::PolicyDefaults;
use super::resource::DEFAULT_VERSION;

/// Engine-level configuration: policy defaults, concurrency limits, mount
/// points and built-in auth strategy settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout for operations that do not declare one.
    pub default_timeout: Duration,
    /// Auth for resources and operations that do not declare one.
    pub default_auth: AuthConfig,
    /// Version for resources and requests that leave it empty.
    pub default_version: String,
    /// Maximum number of concurrent dispatches before load shedding.
    pub max_concurrent_operations: u32,
    /// Path of the RPC endpoint.
    pub rpc_path: String,
    /// Mount prefix of the REST catch-all.
    pub rest_prefix: String,
    pub bearer: BearerConfig,
    pub signature: SignatureConfig,
    /// Interval between sweeps of expired rate-limit windows.
    pub rate_limit_purge_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_auth: AuthConfig::bearer(),
            default_version: DEFAULT_VERSION.to_string(),
            max_concurrent_operations: 1000,
            rpc_path: "/api".to_string(),
            rest_prefix: "/api".to_string(),
            bearer: BearerConfig::default(),
            signature: SignatureConfig::default(),
            rate_limit_purge_interval: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn policy_defaults(&self) -> PolicyDefaults {
        PolicyDefaults {
            timeout: self.default_timeout,
            auth: self.default_auth.clone(),
            version: self.default_version.clone(),
        }
    }
}
