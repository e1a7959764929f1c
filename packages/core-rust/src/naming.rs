//! Naming grammar for resources, actions, and versions.
//!
//! Two dialects exist. RPC resources use `snake_case` segments and
//! `snake_case` actions (`find_page`). REST resources use `kebab-case`
//! segments and actions of the form `"<verb>"` or `"<verb> <sub-resource>"`
//! (`post user-friends`). Resource names of either kind may be namespaced
//! with `/` (`sys/user`).
//!
//! The per-kind casing lives in a single table ([`Casing::for_kind`]) so the
//! REST sub-resource grammar and the REST resource-name grammar cannot drift.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::types::ResourceKind;

const SNAKE_CASE: &str = r"^[a-z][a-z0-9]*(_[a-z0-9]+)*$";
const KEBAB_CASE: &str = r"^[a-z][a-z0-9]*(-[a-z0-9]+)*$";
const VERSION: &str = r"^v[0-9]+$";

/// Errors produced by the naming validators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("resource name must not be empty")]
    EmptyName,
    #[error("resource name {name:?} must not start or end with '/'")]
    SlashBoundary { name: String },
    #[error("resource name {name:?} must not contain '//'")]
    EmptySegment { name: String },
    #[error("resource name {name:?} has segment {segment:?} that is not {casing}")]
    InvalidSegment {
        name: String,
        segment: String,
        casing: Casing,
    },
    #[error("action name must not be empty")]
    EmptyAction,
    #[error("rpc action {action:?} must be snake_case")]
    InvalidRpcAction { action: String },
    #[error("rest action {action:?} must be \"<verb>\" or \"<verb> <sub-resource>\"")]
    InvalidRestAction { action: String },
    #[error("rest action {action:?} uses unknown verb {verb:?}")]
    UnknownVerb { action: String, verb: String },
    #[error("rest action {action:?} has sub-resource {sub_resource:?} that is not kebab-case")]
    InvalidSubResource { action: String, sub_resource: String },
    #[error("version {version:?} must match v<number>")]
    InvalidVersion { version: String },
}

/// Segment casing used by a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Casing {
    Snake,
    Kebab,
}

impl Casing {
    /// The casing table: RPC names are `snake_case`, REST names `kebab-case`.
    #[must_use]
    pub const fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Rpc => Self::Snake,
            ResourceKind::Rest => Self::Kebab,
        }
    }
}

impl fmt::Display for Casing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snake => f.write_str("snake_case"),
            Self::Kebab => f.write_str("kebab-case"),
        }
    }
}

/// HTTP verb accepted at the head of a REST action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestVerb {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    /// Matches every method.
    All,
}

impl RestVerb {
    pub const ALL_VERBS: [RestVerb; 10] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Delete,
        Self::Patch,
        Self::Head,
        Self::Options,
        Self::Trace,
        Self::Connect,
        Self::All,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::Patch => "patch",
            Self::Head => "head",
            Self::Options => "options",
            Self::Trace => "trace",
            Self::Connect => "connect",
            Self::All => "all",
        }
    }
}

impl FromStr for RestVerb {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL_VERBS
            .into_iter()
            .find(|verb| verb.as_str() == s)
            .ok_or(())
    }
}

impl fmt::Display for RestVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed REST action: `"<verb>"` or `"<verb> <sub-resource>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestAction {
    pub verb: RestVerb,
    pub sub_resource: Option<String>,
}

/// Stateless validator for the naming grammar.
///
/// Holds the compiled patterns. Build one at process start and hand it to
/// whatever needs it; cloning is cheap (`Regex` is reference counted).
#[derive(Debug, Clone)]
pub struct NamingRules {
    snake: Regex,
    kebab: Regex,
    version: Regex,
}

impl NamingRules {
    /// Compiles the naming patterns.
    ///
    /// # Panics
    ///
    /// Never in practice: the patterns are compile-time constants covered by
    /// the unit tests.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snake: Regex::new(SNAKE_CASE).expect("snake_case pattern compiles"),
            kebab: Regex::new(KEBAB_CASE).expect("kebab-case pattern compiles"),
            version: Regex::new(VERSION).expect("version pattern compiles"),
        }
    }

    fn pattern(&self, casing: Casing) -> &Regex {
        match casing {
            Casing::Snake => &self.snake,
            Casing::Kebab => &self.kebab,
        }
    }

    /// Validates a version string. Empty is accepted and means "use the
    /// engine default".
    ///
    /// # Errors
    ///
    /// Returns `NamingError::InvalidVersion` when a non-empty version does
    /// not match `v<number>`.
    pub fn validate_version(&self, version: &str) -> Result<(), NamingError> {
        if version.is_empty() || self.version.is_match(version) {
            Ok(())
        } else {
            Err(NamingError::InvalidVersion {
                version: version.to_string(),
            })
        }
    }

    /// Validates a (possibly `/`-namespaced) resource name for the given kind.
    ///
    /// # Errors
    ///
    /// Returns the first grammar violation found.
    pub fn validate_resource_name(
        &self,
        name: &str,
        kind: ResourceKind,
    ) -> Result<(), NamingError> {
        self.validate_path(name, Casing::for_kind(kind))
    }

    fn validate_path(&self, name: &str, casing: Casing) -> Result<(), NamingError> {
        if name.is_empty() {
            return Err(NamingError::EmptyName);
        }
        if name.starts_with('/') || name.ends_with('/') {
            return Err(NamingError::SlashBoundary {
                name: name.to_string(),
            });
        }
        if name.contains("//") {
            return Err(NamingError::EmptySegment {
                name: name.to_string(),
            });
        }

        let pattern = self.pattern(casing);
        match name.split('/').find(|segment| !pattern.is_match(segment)) {
            Some(segment) => Err(NamingError::InvalidSegment {
                name: name.to_string(),
                segment: segment.to_string(),
                casing,
            }),
            None => Ok(()),
        }
    }

    /// Validates an action name in the dialect of the given kind.
    ///
    /// # Errors
    ///
    /// Returns the grammar violation for the action.
    pub fn validate_action_name(
        &self,
        action: &str,
        kind: ResourceKind,
    ) -> Result<(), NamingError> {
        if action.is_empty() {
            return Err(NamingError::EmptyAction);
        }
        match kind {
            ResourceKind::Rpc => {
                if self.snake.is_match(action) {
                    Ok(())
                } else {
                    Err(NamingError::InvalidRpcAction {
                        action: action.to_string(),
                    })
                }
            }
            ResourceKind::Rest => self.parse_rest_action(action).map(|_| ()),
        }
    }

    /// Parses a REST action into its verb and optional sub-resource.
    ///
    /// # Errors
    ///
    /// Returns an error when the action is not `"<verb>"` or
    /// `"<verb> <sub-resource>"`, the verb is unknown, or the sub-resource is
    /// not a valid REST resource name.
    pub fn parse_rest_action(&self, action: &str) -> Result<RestAction, NamingError> {
        if action.is_empty() {
            return Err(NamingError::EmptyAction);
        }

        let mut parts = action.split(' ');
        let verb_part = parts.next().unwrap_or_default();
        let sub_part = parts.next();
        if parts.next().is_some() || verb_part.is_empty() {
            return Err(NamingError::InvalidRestAction {
                action: action.to_string(),
            });
        }

        let verb = verb_part
            .parse::<RestVerb>()
            .map_err(|()| NamingError::UnknownVerb {
                action: action.to_string(),
                verb: verb_part.to_string(),
            })?;

        let sub_resource = match sub_part {
            None => None,
            Some(sub) => {
                if self.validate_path(sub, Casing::Kebab).is_err() {
                    return Err(NamingError::InvalidSubResource {
                        action: action.to_string(),
                        sub_resource: sub.to_string(),
                    });
                }
                Some(sub.to_string())
            }
        };

        Ok(RestAction { verb, sub_resource })
    }
}

impl Default for NamingRules {
    fn default() -> Self {
        Self::new()
    }
}
