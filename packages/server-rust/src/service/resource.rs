//! Declarative resources: a named, versioned group of operations.

use std::collections::HashSet;

use switchyard_core::{AuthConfig, NamingError, NamingRules, ResourceKind};

use super::operation::OperationSpec;

/// Default for `EngineConfig::default_version`.
pub const DEFAULT_VERSION: &str = "v1";

/// Errors raised while building a [`Resource`].
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("resource {resource:?}: {source}")]
    Naming {
        resource: String,
        #[source]
        source: NamingError,
    },
    #[error("resource {resource:?} declares action {action:?} more than once")]
    DuplicateAction { resource: String, action: String },
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A validated resource. Immutable once built.
#[derive(Debug)]
pub struct Resource {
    kind: ResourceKind,
    name: String,
    version: String,
    auth: Option<AuthConfig>,
    operations: Vec<OperationSpec>,
}

impl Resource {
    /// Starts an RPC resource; actions are snake_case names.
    #[must_use]
    pub fn rpc(name: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder::new(ResourceKind::Rpc, name.into())
    }

    /// Starts a REST resource; actions are `"<verb> [<sub-resource>]"`.
    #[must_use]
    pub fn rest(name: impl Into<String>) -> ResourceBuilder {
        ResourceBuilder::new(ResourceKind::Rest, name.into())
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Empty when the resource did not pin one; the engine default applies
    /// at registration.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Resource-level auth; operations without an override inherit it.
    #[must_use]
    pub fn auth(&self) -> Option<&AuthConfig> {
        self.auth.as_ref()
    }

    #[must_use]
    pub fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    /// Splits the resource into its header and operation specs.
    #[must_use]
    pub fn into_operations(self) -> (ResourceHeader, Vec<OperationSpec>) {
        (
            ResourceHeader {
                kind: self.kind,
                name: self.name,
                version: self.version,
                auth: self.auth,
            },
            self.operations,
        )
    }
}

/// Resource fields that remain after the operations have been taken out.
#[derive(Debug, Clone)]
pub struct ResourceHeader {
    pub kind: ResourceKind,
    pub name: String,
    pub version: String,
    pub auth: Option<AuthConfig>,
}

// ---------------------------------------------------------------------------
// ResourceBuilder
// ---------------------------------------------------------------------------

/// Collects options in call order and validates once in [`build`](Self::build).
#[derive(Debug)]
pub struct ResourceBuilder {
    kind: ResourceKind,
    name: String,
    version: String,
    auth: Option<AuthConfig>,
    operations: Vec<OperationSpec>,
}

impl ResourceBuilder {
    fn new(kind: ResourceKind, name: String) -> Self {
        Self {
            kind,
            name,
            version: String::new(),
            auth: None,
            operations: Vec::new(),
        }
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn operation(mut self, spec: OperationSpec) -> Self {
        self.operations.push(spec);
        self
    }

    #[must_use]
    pub fn operations(mut self, specs: impl IntoIterator<Item = OperationSpec>) -> Self {
        self.operations.extend(specs);
        self
    }

    /// Validates the version, the name, and every action, stopping at the
    /// first failure.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Naming` for a grammar violation and
    /// `ResourceError::DuplicateAction` when two operations share an action.
    pub fn build(self, rules: &NamingRules) -> Result<Resource, ResourceError> {
        let naming = |source| ResourceError::Naming {
            resource: self.name.clone(),
            source,
        };

        rules.validate_version(&self.version).map_err(naming)?;
        rules
            .validate_resource_name(&self.name, self.kind)
            .map_err(naming)?;

        let mut seen = HashSet::with_capacity(self.operations.len());
        for spec in &self.operations {
            rules
                .validate_action_name(&spec.action, self.kind)
                .map_err(naming)?;
            if !seen.insert(spec.action.as_str()) {
                return Err(ResourceError::DuplicateAction {
                    resource: self.name.clone(),
                    action: spec.action.clone(),
                });
            }
        }

        Ok(Resource {
            kind: self.kind,
            name: self.name,
            version: self.version,
            auth: self.auth,
            operations: self.operations,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::handler::Handler;
    use crate::service::operation::OperationError;

    fn spec(action: &str) -> OperationSpec {
        OperationSpec::new(
            action,
            Handler::from_fn(|| async { Ok::<_, OperationError>(()) }),
        )
    }

    #[test]
    fn rpc_resource_builds() {
        let rules = NamingRules::new();
        let resource = Resource::rpc("sys/user")
            .operation(spec("find_page"))
            .operation(spec("get_user_info"))
            .build(&rules)
            .unwrap();
        assert_eq!(resource.kind(), ResourceKind::Rpc);
        assert!(resource.version().is_empty());
        assert_eq!(resource.operations().len(), 2);
    }

    #[test]
    fn rest_resource_builds() {
        let rules = NamingRules::new();
        let resource = Resource::rest("sys/user")
            .version("v2")
            .auth(AuthConfig::signature())
            .operations([spec("get"), spec("post user-friends")])
            .build(&rules)
            .unwrap();
        assert_eq!(resource.version(), "v2");
        assert_eq!(resource.auth().unwrap().strategy, "signature");
    }

    #[test]
    fn bad_action_names_the_resource() {
        let rules = NamingRules::new();
        let err = Resource::rpc("sys/user")
            .operation(spec("findPage"))
            .build(&rules)
            .unwrap_err();
        match err {
            ResourceError::Naming { resource, source } => {
                assert_eq!(resource, "sys/user");
                assert!(matches!(source, NamingError::InvalidRpcAction { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn version_is_checked_first() {
        let rules = NamingRules::new();
        let err = Resource::rpc("BadName")
            .version("1.0")
            .build(&rules)
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Naming {
                source: NamingError::InvalidVersion { .. },
                ..
            }
        ));
    }

    #[test]
    fn duplicate_actions_are_rejected() {
        let rules = NamingRules::new();
        let err = Resource::rest("user")
            .operation(spec("get"))
            .operation(spec("get"))
            .build(&rules)
            .unwrap_err();
        assert!(matches!(err, ResourceError::DuplicateAction { .. }));
    }

    #[test]
    fn empty_version_is_left_for_the_engine() {
        let rules = NamingRules::new();
        let resource = Resource::rpc("user").version("").build(&rules).unwrap();
        assert_eq!(resource.version(), "");
    }
}
