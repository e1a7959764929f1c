//! `signature` strategy: HMAC-SHA256 request signing.
//!
//! The caller sends `x-app-id`, `x-timestamp` (unix seconds), `x-nonce` and
//! `x-signature`, where the signature is the lowercase hex HMAC-SHA256 of
//! `"{app_id}\n{timestamp}\n{nonce}\n{identifier}"` keyed with the app
//! secret.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use quick_cache::sync::{Cache, GuardResult};
use serde_json::{Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use switchyard_core::{AuthConfig, Identifier, Principal, PrincipalKind, RequestContext};

use super::{AuthError, AuthRequest, AuthStrategy};

type HmacSha256 = Hmac<Sha256>;

/// Source of per-app signing secrets.
#[async_trait]
pub trait AppSecretStore: Send + Sync {
    /// Returns `None` for unknown apps.
    async fn secret(&self, app_id: &str) -> Option<String>;
}

/// In-memory secret store.
#[derive(Debug, Clone, Default)]
pub struct StaticAppSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticAppSecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_app(mut self, app_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(app_id.into(), secret.into());
        self
    }
}

#[async_trait]
impl AppSecretStore for StaticAppSecretStore {
    async fn secret(&self, app_id: &str) -> Option<String> {
        self.secrets.get(app_id).cloned()
    }
}

/// Signature verification settings.
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    /// Default timestamp skew; operations may override with `max_skew_secs`.
    pub max_skew_secs: u64,
    /// Number of recent nonces remembered for replay detection.
    pub nonce_capacity: usize,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            max_skew_secs: 300,
            nonce_capacity: 100_000,
        }
    }
}

/// Computes the hex signature a client must send.
///
/// # Errors
///
/// Returns `AuthError::Misconfigured` if the secret cannot key an HMAC.
pub fn sign(
    secret: &str,
    app_id: &str,
    timestamp: i64,
    nonce: &str,
    identifier: &Identifier,
) -> Result<String, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| AuthError::Misconfigured(err.to_string()))?;
    mac.update(format!("{app_id}\n{timestamp}\n{nonce}\n{identifier}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies signed machine-to-machine requests.
pub struct SignatureStrategy {
    store: Box<dyn AppSecretStore>,
    config: SignatureConfig,
    /// `"{app_id}:{nonce}"` -> timestamp the nonce was seen with.
    nonces: Cache<String, i64>,
}

impl SignatureStrategy {
    #[must_use]
    pub fn new(store: impl AppSecretStore + 'static, config: SignatureConfig) -> Self {
        let nonces = Cache::new(config.nonce_capacity.max(1));
        Self {
            store: Box::new(store),
            config,
            nonces,
        }
    }

    fn max_skew(&self, options: &Map<String, Value>) -> u64 {
        options
            .get("max_skew_secs")
            .and_then(Value::as_u64)
            .unwrap_or(self.config.max_skew_secs)
    }

    /// Records the nonce; `false` if it was already seen inside the window.
    fn remember_nonce(
        &self,
        app_id: &str,
        nonce: &str,
        timestamp: i64,
        now: i64,
        skew: u64,
    ) -> bool {
        let key = format!("{app_id}:{nonce}");
        // The placeholder guard makes concurrent first uses of a nonce
        // serialize: only one of them inserts.
        match self.nonces.get_value_or_guard(&key, None) {
            GuardResult::Guard(guard) => {
                let _ = guard.insert(timestamp);
                true
            }
            GuardResult::Value(seen) if now.abs_diff(seen) <= skew => false,
            GuardResult::Value(_) => {
                self.nonces.insert(key, timestamp);
                true
            }
            GuardResult::Timeout => false,
        }
    }
}

impl std::fmt::Debug for SignatureStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureStrategy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn required<'a>(request: &'a RequestContext, header: &'static str) -> Result<&'a str, AuthError> {
    request
        .header(header)
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MissingCredentials { expected: header })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[async_trait]
impl AuthStrategy for SignatureStrategy {
    fn name(&self) -> &str {
        AuthConfig::SIGNATURE
    }

    async fn authenticate(
        &self,
        req: &AuthRequest<'_>,
        options: &Map<String, Value>,
    ) -> Result<Principal, AuthError> {
        let app_id = required(req.request, RequestContext::APP_ID)?;
        let timestamp_raw = required(req.request, RequestContext::TIMESTAMP)?;
        let nonce = required(req.request, RequestContext::NONCE)?;
        let signature = required(req.request, RequestContext::SIGNATURE)?;

        let timestamp: i64 = timestamp_raw
            .parse()
            .map_err(|_| AuthError::MalformedHeader {
                header: RequestContext::TIMESTAMP,
                message: "expected unix seconds".into(),
            })?;
        let provided = hex::decode(signature).map_err(|err| AuthError::MalformedHeader {
            header: RequestContext::SIGNATURE,
            message: err.to_string(),
        })?;

        let now = unix_now();
        let skew = self.max_skew(options);
        let observed = now.abs_diff(timestamp);
        if observed > skew {
            tracing::debug!(app_id, observed, skew, "request timestamp outside window");
            return Err(AuthError::TimestampSkew {
                max_skew_secs: skew,
            });
        }

        let secret = self
            .store
            .secret(app_id)
            .await
            .ok_or_else(|| AuthError::UnknownApp {
                app_id: app_id.to_string(),
            })?;
        let expected = hex::decode(sign(&secret, app_id, timestamp, nonce, req.identifier)?)
            .map_err(|err| AuthError::Misconfigured(err.to_string()))?;
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(AuthError::InvalidSignature);
        }

        if !self.remember_nonce(app_id, nonce, timestamp, now, skew) {
            tracing::warn!(app_id, nonce, "replayed request nonce");
            return Err(AuthError::ReplayedNonce);
        }

        Ok(Principal::new(PrincipalKind::External, app_id, app_id))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn strategy() -> SignatureStrategy {
        SignatureStrategy::new(
            StaticAppSecretStore::new().with_app("app-1", "s3cret"),
            SignatureConfig::default(),
        )
    }

    fn signed(app: &str, secret: &str, ts: i64, nonce: &str, id: &Identifier) -> RequestContext {
        let sig = sign(secret, app, ts, nonce, id).unwrap();
        RequestContext::new("r")
            .with_header(RequestContext::APP_ID, app)
            .with_header(RequestContext::TIMESTAMP, ts.to_string())
            .with_header(RequestContext::NONCE, nonce)
            .with_header(RequestContext::SIGNATURE, sig)
    }

    async fn run(
        strategy: &SignatureStrategy,
        id: &Identifier,
        rc: &RequestContext,
    ) -> Result<Principal, AuthError> {
        let req = AuthRequest {
            identifier: id,
            request: rc,
        };
        strategy.authenticate(&req, &Map::new()).await
    }

    #[tokio::test]
    async fn valid_signature_authenticates_the_app() {
        let id = Identifier::new("order", "create", "v1");
        let rc = signed("app-1", "s3cret", unix_now(), "n-1", &id);
        let principal = run(&strategy(), &id, &rc).await.unwrap();
        assert_eq!(principal.kind, PrincipalKind::External);
        assert_eq!(principal.id, "app-1");
    }

    #[tokio::test]
    async fn signature_is_bound_to_the_identifier() {
        let signed_for = Identifier::new("order", "create", "v1");
        let called = Identifier::new("order", "delete", "v1");
        let rc = signed("app-1", "s3cret", unix_now(), "n-1", &signed_for);
        let err = run(&strategy(), &called, &rc).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[tokio::test]
    async fn replayed_nonce_is_rejected() {
        let strategy = strategy();
        let id = Identifier::new("order", "create", "v1");
        let rc = signed("app-1", "s3cret", unix_now(), "n-1", &id);
        run(&strategy, &id, &rc).await.unwrap();
        let err = run(&strategy, &id, &rc).await.unwrap_err();
        assert!(matches!(err, AuthError::ReplayedNonce));
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let id = Identifier::new("order", "create", "v1");
        let rc = signed("app-1", "s3cret", unix_now() - 3600, "n-1", &id);
        let err = run(&strategy(), &id, &rc).await.unwrap_err();
        let expected = SignatureConfig::default().max_skew_secs;
        assert!(matches!(
            err,
            AuthError::TimestampSkew { max_skew_secs } if max_skew_secs == expected
        ));
        assert!(err.to_string().contains(&format!("{expected}s")));
    }

    #[tokio::test]
    async fn skew_can_be_widened_per_operation() {
        let id = Identifier::new("order", "create", "v1");
        let rc = signed("app-1", "s3cret", unix_now() - 3600, "n-1", &id);
        let req = AuthRequest {
            identifier: &id,
            request: &rc,
        };
        let options = json!({"max_skew_secs": 7200});
        strategy()
            .authenticate(&req, options.as_object().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_app_and_missing_headers() {
        let id = Identifier::new("order", "create", "v1");
        let rc = signed("app-2", "s3cret", unix_now(), "n-1", &id);
        let err = run(&strategy(), &id, &rc).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownApp { .. }));

        let err = run(&strategy(), &id, &RequestContext::new("r")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials { expected: "x-app-id" }));
    }
}
