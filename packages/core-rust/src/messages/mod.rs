//! Wire envelope exchanged with the transport layer.
//!
//! Requests name the operation by `(resource, action, version)` and carry
//! free-form `params` and `meta` objects. Responses are always
//! `{ code, message, data }`, where `code == 0` means success.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identifier::Identifier;

/// Inbound request envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub resource: String,
    pub action: String,
    /// May be empty; the engine default version applies.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl Request {
    #[must_use]
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Builds the identifier, substituting `default_version` when the
    /// request left the version empty.
    #[must_use]
    pub fn identifier(&self, default_version: &str) -> Identifier {
        let version = if self.version.is_empty() {
            default_version
        } else {
            &self.version
        };
        Identifier::new(self.resource.clone(), self.action.clone(), version)
    }
}

/// Outbound response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl Response {
    pub const CODE_SUCCESS: i32 = 0;
    pub const MESSAGE_SUCCESS: &'static str = "ok";

    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            code: Self::CODE_SUCCESS,
            message: Self::MESSAGE_SUCCESS.to_string(),
            data,
        }
    }

    #[must_use]
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == Self::CODE_SUCCESS
    }
}
