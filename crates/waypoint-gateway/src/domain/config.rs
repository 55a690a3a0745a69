//! Gateway configuration with validation.
//!
//! Loaded from a TOML file; every section falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Proxy listener configuration
    pub http: HttpConfig,
    /// Admin server configuration (localhost only by default)
    pub admin: AdminConfig,
    /// Route source and reload configuration
    pub routes: RoutesConfig,
    /// Upstream HTTP client configuration
    pub upstream: UpstreamConfig,
    /// Body size limits
    pub limits: LimitsConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `WAYPOINT_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parse::<u16>("WAYPOINT_HTTP_PORT") {
            self.http.port = port;
        }
        if let Some(port) = env_parse::<u16>("WAYPOINT_ADMIN_PORT") {
            self.admin.port = port;
        }
        if let Ok(file) = std::env::var("WAYPOINT_ROUTES_FILE") {
            self.routes.file = Some(PathBuf::from(file));
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.enabled && self.admin.enabled && self.http_addr() == self.admin_addr() {
            return Err(ConfigError::DuplicatePorts);
        }

        if self.limits.max_request_body == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_request_body cannot be 0".into(),
            ));
        }

        if self.limits.max_capture_bytes == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_capture_bytes cannot be 0".into(),
            ));
        }

        if self.routes.reload_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "reload_interval cannot be 0".into(),
            ));
        }

        if self.upstream.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "connect_timeout cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Get proxy listener bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    /// Get Admin server bind address
    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.admin.host, self.admin.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Proxy listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub port: u16,
    /// Enable proxy listener
    pub enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            enabled: true,
        }
    }
}

/// Admin server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bind address (localhost only by default)
    pub host: IpAddr,
    /// Port (default: 9090)
    pub port: u16,
    /// Enable admin server
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9090,
            enabled: true,
        }
    }
}

/// Route source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    /// JSON or TOML file holding the route definitions
    pub file: Option<PathBuf>,
    /// How often the route source is polled for new versions
    #[serde(with = "humantime_serde")]
    pub reload_interval: Duration,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            file: None,
            reload_interval: Duration::from_secs(5),
        }
    }
}

/// Upstream client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Idle pooled connections are closed after this long
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Duration,
    /// Max idle connections kept per upstream host
    pub pool_max_idle_per_host: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
        }
    }
}

/// Body size limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max request body buffered for replay (default: 1MB)
    pub max_request_body: usize,
    /// Max bytes of a failed response body kept for inspection (default: 64KB)
    pub max_capture_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_body: 1024 * 1024,
            max_capture_bytes: 64 * 1024,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(String),
    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// Proxy and admin listeners share an address
    #[error("proxy and admin listeners use the same address")]
    DuplicatePorts,
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}

/// Duration (de)serialization as `200ms`, `5s`, `2m`, `1h` strings.
///
/// A bare integer is read as milliseconds.
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(|_| "invalid hours")
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid duration format")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::humantime_serde::parse_duration;
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.admin.port, 9090);
        assert_eq!(config.routes.reload_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_duplicate_ports() {
        let mut config = GatewayConfig::default();
        config.admin.host = config.http.host;
        config.admin.port = config.http.port;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePorts)
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = GatewayConfig::default();
        config.limits.max_request_body = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimit(_))));

        let mut config = GatewayConfig::default();
        config.routes.reload_interval = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout(_))));
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("200ms"), Ok(Duration::from_millis(200)));
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration(" 750 "), Ok(Duration::from_millis(750)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = GatewayConfig::from_toml(
            r#"
            [http]
            port = 8000

            [routes]
            file = "/etc/waypoint/routes.json"
            reload_interval = "30s"

            [limits]
            max_capture_bytes = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.http.port, 8000);
        assert_eq!(config.admin.port, 9090);
        assert_eq!(config.routes.reload_interval, Duration::from_secs(30));
        assert_eq!(
            config.routes.file.as_deref(),
            Some(Path::new("/etc/waypoint/routes.json"))
        );
        assert_eq!(config.limits.max_capture_bytes, 1024);
    }

    #[test]
    fn test_from_toml_rejects_bad_duration() {
        let err = GatewayConfig::from_toml("[routes]\nreload_interval = \"often\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
