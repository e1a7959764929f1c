use std::fmt;

use serde::{Deserialize, Serialize};

/// Addresses exactly one operation: the `(resource, action, version)` triple.
///
/// Equality and hashing are structural over the three fields. The display
/// form is `resource:action:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    pub resource: String,
    pub action: String,
    pub version: String,
}

impl Identifier {
    #[must_use]
    pub fn new(
        resource: impl Into<String>,
        action: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            version: version.into(),
        }
    }

    /// Field-by-field comparison. Equivalent to `==`; kept for callers that
    /// read better with an explicit method.
    #[must_use]
    pub fn equals(&self, other: &Identifier) -> bool {
        self.resource == other.resource
            && self.action == other.action
            && self.version == other.version
    }

    /// Returns `true` when none of the three fields is empty.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.resource.is_empty() && !self.action.is_empty() && !self.version.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource, self.action, self.version)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn display_joins_fields_with_colons() {
        let id = Identifier::new("sys/user", "find_page", "v1");
        assert_eq!(id.to_string(), "sys/user:find_page:v1");
    }

    #[test]
    fn equality_is_structural() {
        let a = Identifier::new("sys/user", "get", "v1");
        let b = Identifier::new("sys/user", "get", "v1");
        let c = Identifier::new("sys/user", "get", "v2");
        assert!(a.equals(&b));
        assert_eq!(a, b);
        assert!(!a.equals(&c));
    }

    #[test]
    fn equality_does_not_compare_rendered_strings() {
        // Both render as "a:b:c:v1" but address different operations.
        let a = Identifier::new("a:b", "c", "v1");
        let b = Identifier::new("a", "b:c", "v1");
        assert_eq!(a.to_string(), b.to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn usable_as_hash_key() {
        let mut set = HashSet::new();
        set.insert(Identifier::new("user", "create", "v1"));
        assert!(set.contains(&Identifier::new("user", "create", "v1")));
        assert!(!set.contains(&Identifier::new("user", "create", "v2")));
    }

    #[test]
    fn completeness_requires_all_fields() {
        assert!(Identifier::new("user", "create", "v1").is_complete());
        assert!(!Identifier::new("user", "", "v1").is_complete());
    }

    #[test]
    fn serde_uses_field_names() {
        let id = Identifier::new("user", "create", "v1");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"resource": "user", "action": "create", "version": "v1"})
        );
    }
}
