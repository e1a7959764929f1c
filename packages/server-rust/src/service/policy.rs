//! Merges resource-level, operation-level, and engine-wide policy into the
//! effective settings of one operation.

use std::time::Duration;

use switchyard_core::{AuthConfig, RateLimitConfig};

use super::operation::OperationSpec;
use super::resource::{ResourceHeader, DEFAULT_VERSION};

/// Engine-wide fallbacks.
#[derive(Debug, Clone)]
pub struct PolicyDefaults {
    pub timeout: Duration,
    pub auth: AuthConfig,
    pub version: String,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            auth: AuthConfig::bearer(),
            version: DEFAULT_VERSION.to_string(),
        }
    }
}

/// Effective policy of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPolicy {
    pub version: String,
    pub auth: AuthConfig,
    pub timeout: Duration,
    pub rate_limit: Option<RateLimitConfig>,
}

/// Computes the effective policy. Total and deterministic.
///
/// - auth: operation override, then resource, then default; public
///   operations always resolve to `none`.
/// - timeout: the operation's when positive, else the default.
/// - rate limit: kept only when enabled.
/// - version: the resource's, else the default.
#[must_use]
pub fn merge(
    resource: &ResourceHeader,
    spec: &OperationSpec,
    defaults: &PolicyDefaults,
) -> MergedPolicy {
    let auth = if spec.public {
        AuthConfig::none()
    } else {
        spec.auth
            .as_ref()
            .or(resource.auth.as_ref())
            .unwrap_or(&defaults.auth)
            .clone()
    };

    let timeout = if spec.timeout.is_zero() {
        defaults.timeout
    } else {
        spec.timeout
    };

    let rate_limit = spec
        .rate_limit
        .as_ref()
        .filter(|limit| limit.is_enabled())
        .cloned();

    let version = if resource.version.is_empty() {
        defaults.version.clone()
    } else {
        resource.version.clone()
    };

    MergedPolicy {
        version,
        auth,
        timeout,
        rate_limit,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use switchyard_core::ResourceKind;

    use super::*;
    use crate::service::handler::Handler;
    use crate::service::operation::OperationError;

    fn header(auth: Option<AuthConfig>) -> ResourceHeader {
        ResourceHeader {
            kind: ResourceKind::Rest,
            name: "sys/user".into(),
            version: "v1".into(),
            auth,
        }
    }

    fn spec() -> OperationSpec {
        OperationSpec::new("get", Handler::from_fn(|| async { Ok::<_, OperationError>(()) }))
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let merged = merge(&header(None), &spec(), &PolicyDefaults::default());
        assert_eq!(merged.timeout, Duration::from_secs(30));
        assert_eq!(merged.auth.strategy, AuthConfig::BEARER);
        assert!(merged.rate_limit.is_none());
        assert_eq!(merged.version, "v1");
    }

    #[test]
    fn operation_auth_overrides_resource_auth() {
        let merged = merge(
            &header(Some(AuthConfig::signature())),
            &spec().auth(AuthConfig::none()),
            &PolicyDefaults::default(),
        );
        assert_eq!(merged.auth.strategy, AuthConfig::NONE);

        let merged = merge(
            &header(Some(AuthConfig::signature())),
            &spec(),
            &PolicyDefaults::default(),
        );
        assert_eq!(merged.auth.strategy, AuthConfig::SIGNATURE);
    }

    #[test]
    fn public_operations_skip_auth() {
        let merged = merge(
            &header(Some(AuthConfig::signature())),
            &spec().auth(AuthConfig::bearer()).public(),
            &PolicyDefaults::default(),
        );
        assert!(!merged.auth.requires_auth());
    }

    #[test]
    fn positive_timeout_wins() {
        let merged = merge(
            &header(None),
            &spec().timeout(Duration::from_millis(250)),
            &PolicyDefaults::default(),
        );
        assert_eq!(merged.timeout, Duration::from_millis(250));
    }

    #[test]
    fn disabled_rate_limit_is_dropped() {
        let merged = merge(
            &header(None),
            &spec().rate_limit(RateLimitConfig::new(0, Duration::from_secs(1))),
            &PolicyDefaults::default(),
        );
        assert!(merged.rate_limit.is_none());

        let merged = merge(
            &header(None),
            &spec().rate_limit(RateLimitConfig::new(5, Duration::from_secs(1))),
            &PolicyDefaults::default(),
        );
        assert_eq!(merged.rate_limit.unwrap().max, 5);
    }

    #[test]
    fn empty_resource_version_uses_default() {
        let mut resource = header(None);
        resource.version = String::new();
        let defaults = PolicyDefaults {
            version: "v3".into(),
            ..PolicyDefaults::default()
        };
        assert_eq!(merge(&resource, &spec(), &defaults).version, "v3");
    }

    proptest! {
        #[test]
        fn merged_timeout_is_never_zero(millis in 0u64..10_000) {
            let merged = merge(
                &header(None),
                &spec().timeout(Duration::from_millis(millis)),
                &PolicyDefaults::default(),
            );
            prop_assert!(!merged.timeout.is_zero());
            if millis > 0 {
                prop_assert_eq!(merged.timeout, Duration::from_millis(millis));
            }
        }

        #[test]
        fn rate_limit_survives_only_when_enabled(max in 0u32..50, secs in 0u64..5) {
            let limit = RateLimitConfig::new(max, Duration::from_secs(secs));
            let enabled = limit.is_enabled();
            let spec = spec().rate_limit(limit);
            let merged = merge(&header(None), &spec, &PolicyDefaults::default());
            prop_assert_eq!(merged.rate_limit.is_some(), enabled);
        }
    }
}
