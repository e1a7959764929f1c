//! REST router strategy: the action picks the HTTP method and sub-path.
//!
//! `sys/user` + `get` is served at `GET {prefix}/sys/user`, and
//! `sys/user` + `post friends` at `POST {prefix}/sys/user/friends`. The
//! version comes from the `x-api-version` header, else the engine default.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::routing::any;
use axum::Router;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Map, Value};
use switchyard_core::{Identifier, NamingRules, ResourceKind, RestVerb};
use tracing::debug;

use super::{
    envelope, request_context, RouteError, RouterStrategy, API_VERSION_HEADER, META_HEADER,
};
use crate::network::AppState;
use crate::service::operation::{Operation, OperationError};

/// Key of one REST route. `path` is relative to the mount prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestRouteKey {
    pub verb: RestVerb,
    pub path: String,
    pub version: String,
}

/// Concurrent `(verb, path, version) -> Identifier` table.
#[derive(Debug, Default)]
struct RouteTable {
    routes: DashMap<RestRouteKey, Identifier>,
}

impl RouteTable {
    /// Exact method first, then an `all` route on the same path.
    fn resolve(&self, method: &Method, path: &str, version: &str) -> Option<Identifier> {
        let path = path.trim_matches('/');
        let exact = verb_for(method).and_then(|verb| self.get(verb, path, version));
        exact.or_else(|| self.get(RestVerb::All, path, version))
    }

    fn get(&self, verb: RestVerb, path: &str, version: &str) -> Option<Identifier> {
        let key = RestRouteKey {
            verb,
            path: path.to_string(),
            version: version.to_string(),
        };
        self.routes.get(&key).map(|entry| entry.value().clone())
    }
}

/// Maps an HTTP method onto a concrete verb. `all` is never a request method.
fn verb_for(method: &Method) -> Option<RestVerb> {
    method
        .as_str()
        .to_ascii_lowercase()
        .parse::<RestVerb>()
        .ok()
        .filter(|verb| *verb != RestVerb::All)
}

/// Serves REST operations under one catch-all route.
pub struct RestRouterStrategy {
    prefix: String,
    rules: NamingRules,
    table: Arc<RouteTable>,
}

impl RestRouterStrategy {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_rules(prefix, NamingRules::new())
    }

    #[must_use]
    pub fn with_rules(prefix: impl Into<String>, rules: NamingRules) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self {
            prefix,
            rules,
            table: Arc::new(RouteTable::default()),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Derives the route key of a REST identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidAction`] when the action does not parse
    /// as `"<verb>"` or `"<verb> <sub-resource>"`.
    pub fn route_key(&self, identifier: &Identifier) -> Result<RestRouteKey, RouteError> {
        let action = self
            .rules
            .parse_rest_action(&identifier.action)
            .map_err(|source| RouteError::InvalidAction {
                identifier: identifier.clone(),
                source,
            })?;
        let path = match action.sub_resource {
            Some(sub) => format!("{}/{sub}", identifier.resource),
            None => identifier.resource.clone(),
        };
        Ok(RestRouteKey {
            verb: action.verb,
            path,
            version: identifier.version.clone(),
        })
    }

    /// Looks up the operation bound to a request.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str, version: &str) -> Option<Identifier> {
        self.table.resolve(method, path, version)
    }

    #[must_use]
    pub fn route_count(&self) -> usize {
        self.table.routes.len()
    }
}

impl std::fmt::Debug for RestRouterStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRouterStrategy")
            .field("prefix", &self.prefix)
            .field("routes", &self.table.routes.len())
            .finish_non_exhaustive()
    }
}

impl RouterStrategy for RestRouterStrategy {
    fn name(&self) -> &str {
        "rest"
    }

    fn can_handle(&self, kind: ResourceKind) -> bool {
        kind == ResourceKind::Rest
    }

    fn setup(&self, router: Router<AppState>) -> Router<AppState> {
        let table = Arc::clone(&self.table);
        let mount = format!("{}/{{*path}}", self.prefix);
        router.route(
            &mount,
            any(
                move |State(state): State<AppState>,
                      method: Method,
                      Path(path): Path<String>,
                      Query(query): Query<HashMap<String, String>>,
                      headers: HeaderMap,
                      body: Bytes| {
                    let table = Arc::clone(&table);
                    async move {
                        rest_handler(state, &table, &method, &path, query, &headers, &body).await
                    }
                },
            ),
        )
    }

    fn route(&self, operation: &Operation) -> Result<(), RouteError> {
        let key = self.route_key(&operation.identifier)?;
        match self.table.routes.entry(key) {
            Entry::Occupied(entry) => {
                if entry.get() == &operation.identifier {
                    return Ok(());
                }
                let key = entry.key();
                Err(RouteError::Conflict {
                    method: key.verb.as_str().to_ascii_uppercase(),
                    path: format!("{}/{}", self.prefix, key.path),
                    version: key.version.clone(),
                    existing: entry.get().clone(),
                })
            }
            Entry::Vacant(entry) => {
                debug!(
                    verb = %entry.key().verb,
                    path = %entry.key().path,
                    version = %entry.key().version,
                    identifier = %operation.identifier,
                    "REST route bound"
                );
                entry.insert(operation.identifier.clone());
                Ok(())
            }
        }
    }

    fn unroute(&self, identifier: &Identifier) {
        if let Ok(key) = self.route_key(identifier) {
            self.table.routes.remove_if(&key, |_, bound| bound == identifier);
        }
    }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

async fn rest_handler(
    state: AppState,
    table: &RouteTable,
    method: &Method,
    path: &str,
    query: HashMap<String, String>,
    headers: &HeaderMap,
    body: &[u8],
) -> axum::response::Response {
    let rc = request_context(headers);
    let version = rc
        .header(API_VERSION_HEADER)
        .unwrap_or_else(|| state.engine.default_version())
        .to_string();

    let Some(identifier) = table.resolve(method, path, &version) else {
        let requested = Identifier::new(
            path.trim_matches('/'),
            method.as_str().to_ascii_lowercase(),
            version,
        );
        return envelope(Err(OperationError::NotFound {
            identifier: requested,
        }));
    };

    let params = match rest_params(query, body) {
        Ok(params) => params,
        Err(err) => return envelope(Err(err)),
    };
    let meta = match rest_meta(rc.header(META_HEADER)) {
        Ok(meta) => meta,
        Err(err) => return envelope(Err(err)),
    };

    let result = state
        .engine
        .dispatch_routed(ResourceKind::Rest, identifier, params, meta, rc)
        .await;
    envelope(result)
}

/// Query parameters as strings, overlaid by the fields of a JSON object body.
fn rest_params(
    query: HashMap<String, String>,
    body: &[u8],
) -> Result<Map<String, Value>, OperationError> {
    let mut params: Map<String, Value> = query
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(params);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => {
            params.extend(fields);
            Ok(params)
        }
        Ok(_) => Err(OperationError::InvalidRequest(
            "request body must be a JSON object".into(),
        )),
        Err(e) => Err(OperationError::InvalidRequest(format!(
            "malformed JSON body: {e}"
        ))),
    }
}

fn rest_meta(header: Option<&str>) -> Result<Map<String, Value>, OperationError> {
    let Some(raw) = header else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(meta)) => Ok(meta),
        _ => Err(OperationError::InvalidRequest(format!(
            "{META_HEADER} must be a JSON object"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
