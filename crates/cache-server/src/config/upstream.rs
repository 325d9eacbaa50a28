//! Upstream origin and connection pool configuration.

use super::ConfigError;
use hyper::Uri;
use serde::{Deserialize, Serialize};

/// Scheme spoken to the upstream origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Http,
    Https,
}

impl Protocol {
    fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    fn from_scheme(scheme: &str) -> Result<Self, String> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(format!("Unsupported upstream scheme: {scheme}")),
        }
    }
}

/// The fixed origin every forwarded request is sent to.
///
/// Stored as `scheme://authority[/base-path]` with no trailing slash so the
/// inbound path-and-query can be appended verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamOrigin {
    base: String,
}

impl UpstreamOrigin {
    /// Parse the `hash-server-host` value. A bare `host:port` is treated as
    /// plain HTTP.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::Invalid(
                "hash-server-host must not be empty".to_string(),
            ));
        }

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        let uri: Uri = with_scheme.parse().map_err(|e| {
            ConfigError::Invalid(format!("hash-server-host '{raw}' is not a valid URL: {e}"))
        })?;

        let protocol = Protocol::from_scheme(uri.scheme_str().unwrap_or_default())
            .map_err(|e| ConfigError::Invalid(format!("hash-server-host '{raw}': {e}")))?;

        let authority = uri.authority().ok_or_else(|| {
            ConfigError::Invalid(format!("hash-server-host '{raw}' has no host"))
        })?;

        if uri.query().is_some() {
            return Err(ConfigError::Invalid(format!(
                "hash-server-host '{raw}' must not carry a query string"
            )));
        }

        let base_path = uri.path().trim_end_matches('/');
        Ok(Self {
            base: format!("{}://{}{}", protocol.as_str(), authority, base_path),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// Append an inbound path-and-query to the origin.
    pub fn join(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with('/') {
            format!("{}{}", self.base, path_and_query)
        } else {
            format!("{}/{}", self.base, path_and_query)
        }
    }
}

/// Bounds for the shared upstream connection pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_tls_handshake_timeout")]
    pub tls_handshake_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
            tls_handshake_timeout_secs: default_tls_handshake_timeout(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_tls_handshake_timeout() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origin_with_scheme() {
        let origin = UpstreamOrigin::parse("http://127.0.0.1:9000").unwrap();
        assert_eq!(origin.as_str(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_parse_origin_without_scheme_defaults_to_http() {
        let origin = UpstreamOrigin::parse("hash-server:8080").unwrap();
        assert_eq!(origin.as_str(), "http://hash-server:8080");
    }

    #[test]
    fn test_parse_origin_https() {
        let origin = UpstreamOrigin::parse("https://hash.example.com").unwrap();
        assert_eq!(origin.as_str(), "https://hash.example.com");

        let upper = UpstreamOrigin::parse("HTTPS://hash.example.com").unwrap();
        assert_eq!(upper.as_str(), "https://hash.example.com");
    }

    #[test]
    fn test_parse_origin_strips_trailing_slash() {
        let origin = UpstreamOrigin::parse("http://backend/api/").unwrap();
        assert_eq!(origin.as_str(), "http://backend/api");
        assert_eq!(origin.join("/calc?input=a"), "http://backend/api/calc?input=a");
    }

    #[test]
    fn test_parse_origin_rejects_empty() {
        assert!(UpstreamOrigin::parse("   ").is_err());
    }

    #[test]
    fn test_parse_origin_rejects_unknown_scheme() {
        assert!(UpstreamOrigin::parse("ftp://backend").is_err());
    }

    #[test]
    fn test_parse_origin_rejects_query() {
        assert!(UpstreamOrigin::parse("http://backend/?a=1").is_err());
    }

    #[test]
    fn test_join_keeps_query() {
        let origin = UpstreamOrigin::parse("http://backend:80").unwrap();
        assert_eq!(
            origin.join("/other/path?x=1&y=2"),
            "http://backend:80/other/path?x=1&y=2"
        );
    }

    #[test]
    fn test_connection_pool_defaults() {
        let pool = ConnectionPoolConfig::default();
        assert_eq!(pool.max_idle_per_host, 100);
        assert_eq!(pool.idle_timeout_secs, 90);
        assert_eq!(pool.keepalive_secs, 30);
        assert_eq!(pool.connect_timeout_secs, 30);
        assert_eq!(pool.tls_handshake_timeout_secs, 10);
    }
}
