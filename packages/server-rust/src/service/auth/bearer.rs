//! `bearer` strategy: HS256 JSON Web Tokens.

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use switchyard_core::{AuthConfig, Principal, PrincipalKind};

use super::{string_list, AuthError, AuthRequest, AuthStrategy};

/// Token verification settings.
#[derive(Debug, Clone, Default)]
pub struct BearerConfig {
    /// HMAC secret shared with the token issuer.
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Clock leeway for `exp`, in seconds.
    pub leeway_secs: u64,
}

/// Claims read from a token. Unknown claims are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// `user` (default), `external`, or `system`.
    #[serde(default)]
    pub typ: Option<String>,
    pub exp: u64,
}

impl Claims {
    fn into_principal(self) -> Principal {
        let kind = match self.typ.as_deref() {
            Some("external") => PrincipalKind::External,
            Some("system") => PrincipalKind::System,
            _ => PrincipalKind::User,
        };
        let name = self.name.unwrap_or_else(|| self.sub.clone());
        let mut principal = Principal::new(kind, self.sub, name).with_roles(self.roles);
        principal.details.insert("exp".into(), Value::from(self.exp));
        principal
    }
}

/// Validates `Authorization: Bearer <jwt>`.
///
/// Options: `roles` narrows the accepted roles; a token must carry at least
/// one of them.
pub struct BearerStrategy {
    key: DecodingKey,
    validation: Validation,
    configured: bool,
}

impl BearerStrategy {
    #[must_use]
    pub fn new(config: &BearerConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_secs;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            configured: !config.secret.is_empty(),
        }
    }
}

impl std::fmt::Debug for BearerStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerStrategy")
            .field("configured", &self.configured)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthStrategy for BearerStrategy {
    fn name(&self) -> &str {
        AuthConfig::BEARER
    }

    async fn authenticate(
        &self,
        req: &AuthRequest<'_>,
        options: &Map<String, Value>,
    ) -> Result<Principal, AuthError> {
        if !self.configured {
            return Err(AuthError::Misconfigured("bearer secret is not set".into()));
        }
        let token = req.request.bearer_token().ok_or(AuthError::MissingCredentials {
            expected: "bearer token",
        })?;

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            match err.kind() {
                JwtErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(err.to_string()),
            }
        })?;
        let principal = data.claims.into_principal();

        let accepted = string_list(options, "roles");
        if !accepted.is_empty() && !accepted.iter().any(|role| principal.has_role(role)) {
            return Err(AuthError::RoleNotAllowed);
        }
        Ok(principal)
    }
}
