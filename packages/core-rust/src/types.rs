use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Routing dialect of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Every operation behind one endpoint, addressed by the request body.
    Rpc,
    /// Each operation gets its own method and path derived from the action.
    Rest,
}

impl ResourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Rest => "rest",
        }
    }
}

/// What kind of caller a principal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    /// Machine-to-machine caller (external application).
    External,
    System,
    Anonymous,
}

impl PrincipalKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::External => "external",
            Self::System => "system",
            Self::Anonymous => "anonymous",
        }
    }
}

/// Authenticated identity produced by an auth strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub kind: PrincipalKind,
    /// Unique identifier for the authenticated entity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Roles assigned to this principal for authorization checks.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Strategy-specific extras (token claims, app metadata).
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl Principal {
    pub const ANONYMOUS_ID: &'static str = "anonymous";
    pub const SYSTEM_ID: &'static str = "system";

    #[must_use]
    pub fn new(kind: PrincipalKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            roles: Vec::new(),
            details: Map::new(),
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(PrincipalKind::Anonymous, Self::ANONYMOUS_ID, "Anonymous")
    }

    #[must_use]
    pub fn system() -> Self {
        Self::new(PrincipalKind::System, Self::SYSTEM_ID, "System")
    }

    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.kind == PrincipalKind::Anonymous
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Authentication requirement attached to a resource or operation.
///
/// `Clone` is a deep copy: the options map owns its values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Name of the strategy in the auth strategy registry.
    pub strategy: String,
    /// Strategy-specific options.
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl AuthConfig {
    pub const NONE: &'static str = "none";
    pub const BEARER: &'static str = "bearer";
    pub const SIGNATURE: &'static str = "signature";

    #[must_use]
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            options: Map::new(),
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::new(Self::NONE)
    }

    #[must_use]
    pub fn bearer() -> Self {
        Self::new(Self::BEARER)
    }

    #[must_use]
    pub fn signature() -> Self {
        Self::new(Self::SIGNATURE)
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// `false` only for the `none` strategy.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.strategy != Self::NONE
    }
}

/// Fixed-window rate limit. `max == 0` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per period.
    pub max: u32,
    /// Window length.
    pub period: Duration,
    /// Optional key prefix; callers sharing a prefix share nothing else, the
    /// identifier and caller identity are always appended.
    #[serde(default)]
    pub key: Option<String>,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(max: u32, period: Duration) -> Self {
        Self {
            max,
            period,
            key: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.max > 0 && !self.period.is_zero()
    }
}

/// Page request decoded from request meta (`page`, `size`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub size: u32,
}

impl Pagination {
    pub const DEFAULT_PAGE: u32 = 1;
    pub const DEFAULT_SIZE: u32 = 15;
    pub const MAX_SIZE: u32 = 1000;

    /// Reads `page` and `size` from a meta object, falling back to defaults
    /// for missing or non-numeric values and clamping `size`.
    #[must_use]
    pub fn from_meta(meta: &Map<String, Value>) -> Self {
        let read = |key: &str| {
            meta.get(key)
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
        };

        let page = read("page").filter(|p| *p > 0).unwrap_or(Self::DEFAULT_PAGE);
        let size = read("size")
            .filter(|s| *s > 0)
            .unwrap_or(Self::DEFAULT_SIZE)
            .min(Self::MAX_SIZE);
        Self { page, size }
    }

    /// Zero-based row offset of the first item on this page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: Self::DEFAULT_PAGE,
            size: Self::DEFAULT_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn auth_config_clone_is_deep() {
        let original = AuthConfig::bearer().with_option("roles", json!(["admin"]));
        let mut copy = original.clone();
        copy.options.insert("roles".into(), json!(["guest"]));
        assert_eq!(original.options["roles"], json!(["admin"]));
    }

    #[test]
    fn only_none_skips_auth() {
        assert!(!AuthConfig::none().requires_auth());
        assert!(AuthConfig::bearer().requires_auth());
        assert!(AuthConfig::signature().requires_auth());
    }

    #[test]
    fn rate_limit_zero_max_is_unlimited() {
        assert!(!RateLimitConfig::new(0, Duration::from_secs(1)).is_enabled());
        assert!(!RateLimitConfig::new(5, Duration::ZERO).is_enabled());
        assert!(RateLimitConfig::new(5, Duration::from_secs(1)).is_enabled());
    }

    #[test]
    fn pagination_defaults_and_clamps() {
        let empty = Map::new();
        assert_eq!(Pagination::from_meta(&empty), Pagination::default());

        let meta = json!({"page": 3, "size": 5000});
        let p = Pagination::from_meta(meta.as_object().unwrap());
        assert_eq!(p.page, 3);
        assert_eq!(p.size, Pagination::MAX_SIZE);
        assert_eq!(p.offset(), 2000);

        let junk = json!({"page": "x", "size": 0});
        assert_eq!(
            Pagination::from_meta(junk.as_object().unwrap()),
            Pagination::default()
        );
    }

    #[test]
    fn anonymous_principal() {
        let p = Principal::anonymous();
        assert!(p.is_anonymous());
        assert_eq!(p.id, Principal::ANONYMOUS_ID);
        assert!(!Principal::system().is_anonymous());
    }
}
