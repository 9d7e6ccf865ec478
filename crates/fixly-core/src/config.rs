//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::types::ApiUrl;

/// Environment variable holding the API base URL.
pub const ENV_API_URL: &str = "FIXLY_API_URL";
/// Environment variable holding the API path prefix.
pub const ENV_API_PREFIX: &str = "FIXLY_API_PREFIX";
/// Environment variable holding the request timeout in seconds.
pub const ENV_API_TIMEOUT_SECS: &str = "FIXLY_API_TIMEOUT_SECS";
/// Environment variable holding the retry attempt ceiling.
pub const ENV_API_RETRY_ATTEMPTS: &str = "FIXLY_API_RETRY_ATTEMPTS";

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_API_PREFIX: &str = "/api/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Settings consumed by the API client.
///
/// `retry_attempts` is informational. Authentication failures are retried
/// exactly once regardless of its value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: ApiUrl,
    #[serde(default = "default_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    #[serde(default = "default_profile_path")]
    pub profile_path: String,
}

impl ClientConfig {
    /// Configuration with default paths and timeouts for the given base URL.
    pub fn new(base_url: ApiUrl) -> Self {
        Self {
            base_url,
            api_prefix: default_prefix(),
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            logout_path: default_logout_path(),
            profile_path: default_profile_path(),
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration using an arbitrary variable lookup.
    ///
    /// Unset variables fall back to defaults; set but unparsable variables
    /// are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_API_URL).unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let base_url = ApiUrl::new(&base_url).map_err(|e| Error::Config {
            message: format!("{}: {}", ENV_API_URL, e),
        })?;

        let mut config = Self::new(base_url);

        if let Some(prefix) = lookup(ENV_API_PREFIX) {
            config.api_prefix = prefix;
        }

        if let Some(raw) = lookup(ENV_API_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| Error::Config {
                message: format!("{} must be a whole number of seconds, got '{}'", ENV_API_TIMEOUT_SECS, raw),
            })?;
            if secs == 0 {
                return Err(Error::Config {
                    message: format!("{} must be greater than zero", ENV_API_TIMEOUT_SECS),
                });
            }
            config.timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup(ENV_API_RETRY_ATTEMPTS) {
            config.retry_attempts = raw.trim().parse().map_err(|_| Error::Config {
                message: format!("{} must be a non-negative integer, got '{}'", ENV_API_RETRY_ATTEMPTS, raw),
            })?;
        }

        debug!(
            base_url = %config.base_url,
            prefix = %config.api_prefix,
            timeout_secs = config.timeout.as_secs(),
            "Loaded client configuration"
        );

        Ok(config)
    }

    /// Full URL for an API path.
    pub fn url_for(&self, path: &str) -> String {
        self.base_url.endpoint_url(&self.api_prefix, path)
    }

    /// True if `path` names the login endpoint.
    pub fn is_login_path(&self, path: &str) -> bool {
        normalize_path(path) == normalize_path(&self.login_path)
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.trim_matches('/')
}

fn default_prefix() -> String {
    DEFAULT_API_PREFIX.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_refresh_path() -> String {
    "/auth/refresh".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

fn default_profile_path() -> String {
    "/users/me".to_string()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:8000/");
        assert_eq!(config.api_prefix, "/api/v1");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(
            config.url_for("/auth/refresh"),
            "http://localhost:8000/api/v1/auth/refresh"
        );
    }

    #[test]
    fn reads_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (ENV_API_URL, "https://api.fixly.app"),
            (ENV_API_PREFIX, ""),
            (ENV_API_TIMEOUT_SECS, "12"),
            (ENV_API_RETRY_ATTEMPTS, "5"),
        ]))
        .unwrap();

        assert_eq!(config.url_for("users/me"), "https://api.fixly.app/users/me");
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(config.retry_attempts, 5);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup_from(&[(ENV_API_TIMEOUT_SECS, "soon")])),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup_from(&[(ENV_API_TIMEOUT_SECS, "0")])),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup_from(&[(ENV_API_URL, "http://example.com")])),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn login_path_matching_ignores_slashes_and_query() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert!(config.is_login_path("/auth/login"));
        assert!(config.is_login_path("auth/login/"));
        assert!(config.is_login_path("/auth/login?next=home"));
        assert!(!config.is_login_path("/auth/refresh"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"base_url": "https://api.fixly.app", "timeout": 5}"#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.login_path, "/auth/login");
    }
}
