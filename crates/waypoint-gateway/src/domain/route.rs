//! Route definitions as delivered by the route configuration store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// One versioned route snapshot.
///
/// `route_id` is stable across versions; `(id, version)` addresses a single
/// historical snapshot. The gateway never mutates these, it only rebuilds its
/// pipeline when a newer version shows up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    /// Storage identifier of the snapshot
    #[serde(default)]
    pub id: Option<String>,
    /// Stable, unique route identifier
    #[serde(alias = "routeIdentifier")]
    pub route_id: String,
    /// Path pattern, e.g. `/inventory/**`
    pub path: String,
    /// HTTP method; `None` or `*` matches any
    #[serde(default)]
    pub method: Option<String>,
    /// Upstream base URI (scheme and authority are used)
    pub uri: String,
    /// Filter declarations in configuration order
    #[serde(default)]
    pub filters: Vec<FilterDeclaration>,
    /// Monotonic version number
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RouteDefinition {
    pub fn new(route_id: impl Into<String>, path: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: None,
            route_id: route_id.into(),
            path: path.into(),
            method: None,
            uri: uri.into(),
            filters: Vec::new(),
            version: 1,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_filter(mut self, filter: FilterDeclaration) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// Untyped filter declaration: a name plus string arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDeclaration {
    pub name: String,
    #[serde(default, deserialize_with = "scalar_args")]
    pub args: BTreeMap<String, String>,
}

/// Accept `3`, `true` and `"3"` alike; filters parse their own values.
fn scalar_args<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Bool(bool),
        Int(i64),
        Float(f64),
    }

    let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Scalar::Text(text) => text,
                Scalar::Bool(flag) => flag.to_string(),
                Scalar::Int(n) => n.to_string(),
                Scalar::Float(n) => n.to_string(),
            };
            (key, value)
        })
        .collect())
}

impl FilterDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.args.insert(key.into(), value.to_string());
        self
    }
}

/// Request extension identifying the matched route.
///
/// Inserted by the executor before the chain runs; the rate limiter resolves
/// its bucket key from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteContext {
    pub route_id: String,
    pub version: u64,
}
