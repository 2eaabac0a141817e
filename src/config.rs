//! Configuration parsing and validation for modelmux.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub breakers: BreakerConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Admin HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Circuit breaker thresholds, applied uniformly to every model's breaker.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures required to open a circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds a circuit stays open before a recovery probe is admitted.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_seconds: u64,
    /// Latency ceiling in milliseconds; slower successes count as failures.
    #[serde(default = "default_latency_threshold")]
    pub latency_threshold_ms: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_timeout() -> u64 {
    60
}

fn default_latency_threshold() -> u64 {
    5000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout(),
            latency_threshold_ms: default_latency_threshold(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// The inner `SecretString` ensures the key value is only accessible via
/// `.expose_secret()`, keeping every read grep-auditable.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// First eight characters of the key, for log correlation without
    /// revealing the full value.
    pub fn prefix(&self) -> String {
        self.0.expose_secret().chars().take(8).collect()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// One provider's credential pool.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Provider this pool belongs to (e.g., "groq").
    pub provider: String,
    /// Interchangeable keys, tried in order under rotation.
    #[serde(default)]
    pub keys: Vec<ApiKey>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.breakers.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "breakers.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.breakers.latency_threshold_ms == 0 {
            return Err(ConfigError::Validation(
                "breakers.latency_threshold_ms must be at least 1".to_string(),
            ));
        }

        for pool in &self.credentials {
            if pool.provider.is_empty() {
                return Err(ConfigError::Validation(
                    "credentials entry has empty provider name".to_string(),
                ));
            }
            if pool.keys.is_empty() {
                tracing::warn!(
                    provider = %pool.provider,
                    "credential pool is empty - calls to this provider cannot authenticate"
                );
            }
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Raw credential pool deserialized directly from TOML. Keys are plain
/// strings so they may contain `${VAR}` references not yet expanded.
#[derive(Deserialize)]
pub struct RawCredentialsConfig {
    provider: String,
    #[serde(default)]
    keys: Vec<String>,
}

/// Raw configuration deserialized directly from TOML, before env expansion.
#[derive(Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    breakers: BreakerConfig,
    #[serde(default)]
    credentials: Vec<RawCredentialsConfig>,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// The closure-based design makes this testable without touching global env
/// state. Supports multiple `${VAR}` in one string. Fails on the first
/// missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: format!("Unclosed '${{' in config value: {}", input),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in provider '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Expand all `${VAR}` references using real environment variables.
fn expand_env_vars(input: &str, provider_name: &str) -> Result<String, ConfigError> {
    expand_env_vars_with(input, provider_name, |name| std::env::var(name).ok())
}

impl Config {
    /// Convert raw (deserialized) config to final config with env var
    /// expansion applied to every credential value.
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut credentials = Vec::with_capacity(raw.credentials.len());

        for pool in raw.credentials {
            let mut keys = Vec::with_capacity(pool.keys.len());
            for raw_key in &pool.keys {
                let expanded = expand_env_vars(raw_key, &pool.provider)?;
                keys.push(ApiKey::from(expanded));
            }
            credentials.push(CredentialsConfig {
                provider: pool.provider,
                keys,
            });
        }

        Ok(Config {
            server: raw.server,
            breakers: raw.breakers,
            credentials,
            logging: raw.logging,
        })
    }

    /// Load configuration from a TOML file with environment variable
    /// expansion. This is the env-var-aware entry point used by the binary.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let config = Self::from_raw(raw)?;
        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = Config::parse_str("").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.breakers.failure_threshold, 3);
        assert_eq!(config.breakers.recovery_timeout_seconds, 60);
        assert_eq!(config.breakers.latency_threshold_ms, 5000);
        assert!(config.credentials.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:9090"

            [breakers]
            failure_threshold = 5
            recovery_timeout_seconds = 120
            latency_threshold_ms = 2500

            [[credentials]]
            provider = "groq"
            keys = ["gsk_first", "gsk_second"]

            [logging]
            level = "debug"
        "#;

        let config = Config::parse_str(toml).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9090");
        assert_eq!(config.breakers.failure_threshold, 5);
        assert_eq!(config.breakers.recovery_timeout_seconds, 120);
        assert_eq!(config.breakers.latency_threshold_ms, 2500);
        assert_eq!(config.credentials.len(), 1);
        assert_eq!(config.credentials[0].provider, "groq");
        assert_eq!(config.credentials[0].keys.len(), 2);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_zero_failure_threshold_rejected() {
        let toml = r#"
            [breakers]
            failure_threshold = 0
        "#;
        let result = Config::parse_str(toml);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_empty_provider_name_rejected() {
        let toml = r#"
            [[credentials]]
            provider = ""
            keys = ["k1"]
        "#;
        let result = Config::parse_str(toml);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_api_key_debug_redaction() {
        let key = ApiKey::from("gsk_super_secret_value");
        let debug_output = format!("{:?}", key);
        assert_eq!(debug_output, "[REDACTED]");
        assert!(!debug_output.contains("super_secret"));
    }

    #[test]
    fn test_api_key_display_redaction() {
        let key = ApiKey::from("gsk_super_secret_value");
        assert_eq!(format!("{}", key), "[REDACTED]");
    }

    #[test]
    fn test_api_key_serialize_redaction() {
        let key = ApiKey::from("real-secret-value");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"[REDACTED]\"");
    }

    #[test]
    fn test_api_key_expose_and_prefix() {
        let key = ApiKey::from("gsk_abcdef123456");
        assert_eq!(key.expose_secret(), "gsk_abcdef123456");
        assert_eq!(key.prefix(), "gsk_abcd");
    }

    #[test]
    fn test_api_key_prefix_short_key() {
        let key = ApiKey::from("abc");
        assert_eq!(key.prefix(), "abc");
    }

    #[test]
    fn test_credentials_debug_redaction() {
        let toml = r#"
            [[credentials]]
            provider = "groq"
            keys = ["gsk_leaky_key"]
        "#;
        let config = Config::parse_str(toml).unwrap();
        let debug = format!("{:?}", config.credentials[0]);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("gsk_leaky_key"));
    }

    // ── Expansion tests (using expand_env_vars_with, no global env state) ──

    #[test]
    fn test_expand_single_var() {
        let lookup = |name: &str| match name {
            "MY_KEY" => Some("gsk_resolved".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("${MY_KEY}", "groq", lookup).unwrap();
        assert_eq!(result, "gsk_resolved");
    }

    #[test]
    fn test_expand_multiple_vars() {
        let lookup = |name: &str| match name {
            "PREFIX" => Some("gsk".to_string()),
            "SUFFIX" => Some("123".to_string()),
            _ => None,
        };
        let result = expand_env_vars_with("${PREFIX}_${SUFFIX}", "groq", lookup).unwrap();
        assert_eq!(result, "gsk_123");
    }

    #[test]
    fn test_expand_no_vars_passthrough() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("literal-value", "groq", lookup).unwrap();
        assert_eq!(result, "literal-value");
    }

    #[test]
    fn test_expand_missing_var_fails() {
        let lookup = |_: &str| None;
        let result = expand_env_vars_with("${MISSING}", "groq", lookup);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("MISSING"), "Error should name the variable");
        assert!(err.contains("groq"), "Error should name the provider");
    }

    #[test]
    fn test_expand_unclosed_brace_fails() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("${UNCLOSED", "groq", lookup);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string().to_lowercase();
        assert!(err.contains("unclosed"));
    }

    #[test]
    fn test_expand_empty_var_name_fails() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("${}", "groq", lookup);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string().to_lowercase();
        assert!(err.contains("empty"));
    }

    #[test]
    fn test_expand_dollar_without_brace_passthrough() {
        let lookup = |_: &str| -> Option<String> { panic!("should not be called") };
        let result = expand_env_vars_with("$NOT_A_VAR", "groq", lookup).unwrap();
        assert_eq!(result, "$NOT_A_VAR");
    }

    // ── from_raw integration tests ──

    #[test]
    fn test_from_raw_expands_keys() {
        let var_name = "MODELMUX_TEST_EXPAND_KEY";
        let var_value = "gsk_from_env_abc";
        unsafe { std::env::set_var(var_name, var_value) };

        let raw = RawConfig {
            server: ServerConfig::default(),
            breakers: BreakerConfig::default(),
            credentials: vec![RawCredentialsConfig {
                provider: "groq".to_string(),
                keys: vec![format!("${{{}}}", var_name), "gsk_literal".to_string()],
            }],
            logging: LoggingConfig::default(),
        };

        let config = Config::from_raw(raw).unwrap();
        assert_eq!(config.credentials[0].keys[0].expose_secret(), var_value);
        assert_eq!(config.credentials[0].keys[1].expose_secret(), "gsk_literal");

        unsafe { std::env::remove_var(var_name) };
    }

    #[test]
    fn test_from_raw_missing_env_var_fails() {
        let var_name = "MODELMUX_TEST_DEFINITELY_MISSING";
        unsafe { std::env::remove_var(var_name) };

        let raw = RawConfig {
            server: ServerConfig::default(),
            breakers: BreakerConfig::default(),
            credentials: vec![RawCredentialsConfig {
                provider: "groq".to_string(),
                keys: vec![format!("${{{}}}", var_name)],
            }],
            logging: LoggingConfig::default(),
        };

        let result = Config::from_raw(raw);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(
            err.contains(var_name),
            "Error should name the variable: {}",
            err
        );
    }
}
