//! Configuration for the realtime connection, loaded from the environment.

use std::time::Duration;

use secrecy::SecretString;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Connection parameters for the exam realtime endpoint.
///
/// All variables have defaults matching the reference deployment, so a bare
/// environment yields a working local configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RealtimeConfig {
    /// WebSocket base address, e.g. `ws://localhost:8080`.
    pub base_url: String,
    /// Endpoint path appended to the base address.
    pub endpoint: String,
    /// Fixed delay between reconnection attempts.
    pub reconnect_interval: Duration,
    /// Attempts after an abnormal disconnect before giving up for good.
    pub max_reconnect_attempts: u32,
}

impl RealtimeConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let base_url =
            std::env::var("EXAM_WS_BASE_URL").unwrap_or_else(|_| "ws://localhost:8080".to_string());
        let endpoint =
            std::env::var("EXAM_WS_ENDPOINT").unwrap_or_else(|_| "/api/exam-timer".to_string());

        let reconnect_interval = match std::env::var("EXAM_WS_RECONNECT_INTERVAL_MS") {
            Ok(raw) => {
                let millis = raw.parse::<u64>().map_err(|_| {
                    ConfigError::InvalidValue(
                        "EXAM_WS_RECONNECT_INTERVAL_MS".to_string(),
                        format!("'{}' is not a valid millisecond count", raw),
                    )
                })?;
                Duration::from_millis(millis)
            }
            Err(_) => Duration::from_millis(5000),
        };

        let max_reconnect_attempts = match std::env::var("EXAM_WS_MAX_RECONNECT_ATTEMPTS") {
            Ok(raw) => raw.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue(
                    "EXAM_WS_MAX_RECONNECT_ATTEMPTS".to_string(),
                    format!("'{}' is not a valid attempt count", raw),
                )
            })?,
            Err(_) => 5,
        };

        Ok(Self {
            base_url,
            endpoint,
            reconnect_interval,
            max_reconnect_attempts,
        })
    }

    /// The full connection address.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.endpoint)
    }
}

/// Where the auth token comes from.
///
/// The token lives in external session storage owned by the surrounding
/// application; this engine only reads it, and re-reads it on every
/// connection attempt so a refreshed token is picked up by a reconnect.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<SecretString>;
}

/// Reads the token from an environment variable (default `EXAM_AUTH_TOKEN`).
pub struct EnvTokenSource {
    var: String,
}

impl EnvTokenSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvTokenSource {
    fn default() -> Self {
        Self::new("EXAM_AUTH_TOKEN")
    }
}

impl TokenSource for EnvTokenSource {
    fn token(&self) -> Option<SecretString> {
        std::env::var(&self.var)
            .ok()
            .filter(|token| !token.is_empty())
            .map(SecretString::from)
    }
}

/// A fixed token, handed over once at construction time.
pub struct StaticTokenSource {
    token: Option<SecretString>,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(SecretString::from(token.into())),
        }
    }

    /// A source that never yields a token; `open` becomes a logged no-op.
    pub fn empty() -> Self {
        Self { token: None }
    }
}

impl TokenSource for StaticTokenSource {
    fn token(&self) -> Option<SecretString> {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("EXAM_WS_BASE_URL");
            env::remove_var("EXAM_WS_ENDPOINT");
            env::remove_var("EXAM_WS_RECONNECT_INTERVAL_MS");
            env::remove_var("EXAM_WS_MAX_RECONNECT_ATTEMPTS");
            env::remove_var("EXAM_AUTH_TOKEN");
        }
    }

    #[test]
    fn test_config_error_display() {
        let invalid =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        clear_env_vars();

        let config = RealtimeConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.base_url, "ws://localhost:8080");
        assert_eq!(config.endpoint, "/api/exam-timer");
        assert_eq!(config.reconnect_interval, Duration::from_millis(5000));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.url(), "ws://localhost:8080/api/exam-timer");
    }

    #[test]
    #[serial]
    fn test_config_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("EXAM_WS_BASE_URL", "wss://exams.example.edu");
            env::set_var("EXAM_WS_ENDPOINT", "/ws/exam-monitor");
            env::set_var("EXAM_WS_RECONNECT_INTERVAL_MS", "3000");
            env::set_var("EXAM_WS_MAX_RECONNECT_ATTEMPTS", "8");
        }

        let config = RealtimeConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.base_url, "wss://exams.example.edu");
        assert_eq!(config.endpoint, "/ws/exam-monitor");
        assert_eq!(config.reconnect_interval, Duration::from_millis(3000));
        assert_eq!(config.max_reconnect_attempts, 8);
        assert_eq!(config.url(), "wss://exams.example.edu/ws/exam-monitor");
    }

    #[test]
    #[serial]
    fn test_config_invalid_interval() {
        clear_env_vars();
        unsafe {
            env::set_var("EXAM_WS_RECONNECT_INTERVAL_MS", "soon");
        }

        let err = RealtimeConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => {
                assert_eq!(var, "EXAM_WS_RECONNECT_INTERVAL_MS");
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_attempt_count() {
        clear_env_vars();
        unsafe {
            env::set_var("EXAM_WS_MAX_RECONNECT_ATTEMPTS", "-1");
        }

        let err = RealtimeConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => {
                assert_eq!(var, "EXAM_WS_MAX_RECONNECT_ATTEMPTS");
            }
        }
    }

    #[test]
    #[serial]
    fn test_env_token_source() {
        clear_env_vars();
        let source = EnvTokenSource::default();
        assert!(source.token().is_none());

        unsafe {
            env::set_var("EXAM_AUTH_TOKEN", "");
        }
        assert!(source.token().is_none(), "empty token counts as absent");

        unsafe {
            env::set_var("EXAM_AUTH_TOKEN", "jwt-abc");
        }
        let token = source.token().expect("token present");
        assert_eq!(token.expose_secret(), "jwt-abc");
    }

    #[test]
    fn test_static_token_source() {
        let source = StaticTokenSource::new("fixed");
        assert_eq!(source.token().expect("token present").expose_secret(), "fixed");
        assert!(StaticTokenSource::empty().token().is_none());
    }
}
