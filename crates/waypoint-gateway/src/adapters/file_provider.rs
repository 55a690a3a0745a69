//! Route definitions read from a JSON or TOML file.
//!
//! JSON files hold either a bare array of routes or `{"routes": [...]}`;
//! TOML files use `[[routes]]` tables. The file is re-read on every poll.

use crate::domain::route::RouteDefinition;
use crate::ports::outbound::{ProviderError, RouteConfigProvider};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFormat {
    Json,
    Toml,
}

impl RouteFormat {
    /// `.toml` files are TOML; everything else is treated as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => RouteFormat::Toml,
            _ => RouteFormat::Json,
        }
    }
}

#[derive(Deserialize)]
struct RouteFile {
    #[serde(default)]
    routes: Vec<RouteDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonRoutes {
    List(Vec<RouteDefinition>),
    Wrapped(RouteFile),
}

pub fn parse_routes(raw: &str, format: RouteFormat) -> Result<Vec<RouteDefinition>, ProviderError> {
    match format {
        RouteFormat::Json => match serde_json::from_str(raw) {
            Ok(JsonRoutes::List(routes)) => Ok(routes),
            Ok(JsonRoutes::Wrapped(file)) => Ok(file.routes),
            Err(e) => Err(ProviderError::Parse(e.to_string())),
        },
        RouteFormat::Toml => toml::from_str::<RouteFile>(raw)
            .map(|file| file.routes)
            .map_err(|e| ProviderError::Parse(e.to_string())),
    }
}

pub struct FileRouteProvider {
    path: PathBuf,
    format: RouteFormat,
}

impl FileRouteProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = RouteFormat::from_path(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RouteConfigProvider for FileRouteProvider {
    async fn load_routes(&self) -> Result<Vec<RouteDefinition>, ProviderError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ProviderError::Io(format!("{}: {}", self.path.display(), e)))?;
        parse_routes(&raw, self.format)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
