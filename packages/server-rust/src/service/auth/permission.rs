use serde_json::Value;
use switchyard_core::Principal;

/// Decides whether a principal holds an operation's permission token.
pub trait PermissionChecker: Send + Sync {
    fn check(&self, principal: &Principal, perm_token: &str) -> bool;
}

/// Grants a token when the principal has it as a role, lists it under
/// `details.permissions`, or holds the admin role.
#[derive(Debug, Clone)]
pub struct RolePermissionChecker {
    admin_role: String,
}

impl RolePermissionChecker {
    pub const DEFAULT_ADMIN_ROLE: &'static str = "admin";

    #[must_use]
    pub fn new(admin_role: impl Into<String>) -> Self {
        Self {
            admin_role: admin_role.into(),
        }
    }
}

impl Default for RolePermissionChecker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ADMIN_ROLE)
    }
}

impl PermissionChecker for RolePermissionChecker {
    fn check(&self, principal: &Principal, perm_token: &str) -> bool {
        if principal.has_role(&self.admin_role) || principal.has_role(perm_token) {
            return true;
        }
        principal
            .details
            .get("permissions")
            .and_then(Value::as_array)
            .is_some_and(|perms| perms.iter().any(|p| p.as_str() == Some(perm_token)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use switchyard_core::PrincipalKind;

    use super::*;

    fn user(roles: &[&str]) -> Principal {
        Principal::new(PrincipalKind::User, "u1", "Alice").with_roles(roles.iter().copied())
    }

    #[test]
    fn admin_passes_everything() {
        let checker = RolePermissionChecker::default();
        assert!(checker.check(&user(&["admin"]), "user:delete"));
    }

    #[test]
    fn role_or_detail_grants_token() {
        let checker = RolePermissionChecker::default();
        assert!(checker.check(&user(&["user:delete"]), "user:delete"));

        let mut principal = user(&[]);
        principal
            .details
            .insert("permissions".into(), json!(["user:delete"]));
        assert!(checker.check(&principal, "user:delete"));
    }

    #[test]
    fn missing_token_is_denied() {
        let checker = RolePermissionChecker::default();
        assert!(!checker.check(&user(&["viewer"]), "user:delete"));
        assert!(!checker.check(&Principal::anonymous(), "user:delete"));
    }
}
