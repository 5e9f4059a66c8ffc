//! Gateway configuration
//!
//! All knobs come from the environment (see `from_env`); defaults are
//! chosen so a local gateway runs against local stubs out of the box.

use std::time::Duration;

/// Runtime configuration for the gateway process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port the gateway listens on (default: 3001)
    pub listen_port: u16,
    /// Base URL of the agent key registry
    pub registry_url: String,
    /// Upstream receiving `/api`-prefixed requests
    pub api_upstream_url: String,
    /// Upstream receiving everything else
    pub app_upstream_url: String,
    /// How long a fetched key record may be served from cache
    pub cache_ttl: Duration,
    /// How long a nonce is retained for replay detection
    pub nonce_ttl: Duration,
    /// Allowed clock skew in seconds for the `created` timestamp
    pub clock_skew_secs: i64,
    /// Verbose request logging
    pub debug: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_port: 3001,
            registry_url: "http://127.0.0.1:8000".to_string(),
            api_upstream_url: "http://127.0.0.1:8001".to_string(),
            app_upstream_url: "http://127.0.0.1:3000".to_string(),
            cache_ttl: Duration::from_millis(5_000),
            nonce_ttl: Duration::from_millis(3_600_000),
            clock_skew_secs: 60,
            debug: false,
        }
    }
}

impl GatewayConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from the environment.
    ///
    /// Recognised variables: `LISTEN_PORT`, `REGISTRY_URL`,
    /// `API_UPSTREAM_URL`, `APP_UPSTREAM_URL`, `CACHE_TTL_MS`,
    /// `NONCE_TTL_MS`, `CLOCK_SKEW_S`, `DEBUG`. Unset or unparseable
    /// values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_port: env_parse("LISTEN_PORT").unwrap_or(defaults.listen_port),
            registry_url: env_string("REGISTRY_URL").unwrap_or(defaults.registry_url),
            api_upstream_url: env_string("API_UPSTREAM_URL").unwrap_or(defaults.api_upstream_url),
            app_upstream_url: env_string("APP_UPSTREAM_URL").unwrap_or(defaults.app_upstream_url),
            cache_ttl: env_parse("CACHE_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.cache_ttl),
            nonce_ttl: env_parse("NONCE_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.nonce_ttl),
            clock_skew_secs: env_parse("CLOCK_SKEW_S").unwrap_or(defaults.clock_skew_secs),
            debug: env_string("DEBUG")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.debug),
        }
    }

    /// Set the listen port
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Set the registry base URL
    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    /// Set the API upstream URL
    pub fn with_api_upstream(mut self, url: impl Into<String>) -> Self {
        self.api_upstream_url = url.into();
        self
    }

    /// Set the app upstream URL
    pub fn with_app_upstream(mut self, url: impl Into<String>) -> Self {
        self.app_upstream_url = url.into();
        self
    }

    /// Set the key cache TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the nonce retention window
    pub fn with_nonce_ttl(mut self, ttl: Duration) -> Self {
        self.nonce_ttl = ttl;
        self
    }

    /// Set the allowed clock skew in seconds
    pub fn with_clock_skew_secs(mut self, skew: i64) -> Self {
        self.clock_skew_secs = skew;
        self
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}
