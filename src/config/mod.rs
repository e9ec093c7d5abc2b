//! Configuration module for the credit gateway.
//!
//! The gateway is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [database]
//! type = "sqlite"
//! path = "creditgate.db"
//!
//! [providers.openai]
//! type = "open_ai"
//! api_key = "${OPENAI_API_KEY}"
//! allowed_models = ["gpt-4o", "gpt-4o-mini"]
//! ```

mod assistants;
mod auth;
mod cache;
mod credits;
mod database;
mod limits;
mod observability;
mod providers;
mod server;
mod supervision;

use std::path::Path;

pub use assistants::*;
pub use auth::*;
pub use cache::*;
pub use credits::*;
pub use database::*;
pub use limits::*;
pub use observability::*;
pub use providers::*;
use serde::{Deserialize, Serialize};
pub use server::*;
pub use supervision::*;

/// Root configuration for the gateway.
///
/// All sections are optional with sensible defaults, so a config file only
/// needs the providers and models it actually serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database holding the credit ledger and generation sessions.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Cache backing the rate limiter.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Requester identity extraction.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Tiered rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Pricing catalog, markups and carbon coefficients.
    #[serde(default)]
    pub pricing: crate::pricing::PricingConfig,

    /// Spend estimation parameters.
    #[serde(default)]
    pub credits: CreditsConfig,

    /// Guardian supervision settings.
    #[serde(default)]
    pub supervision: SupervisionConfig,

    /// Upstream provider configurations.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Assistant personas selectable per request.
    #[serde(default)]
    pub assistants: AssistantsConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let config: GatewayConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.cache.validate()?;
        self.auth.validate()?;
        self.rate_limits.validate()?;
        self.pricing.validate()?;
        self.credits.validate()?;
        self.supervision.validate()?;
        self.providers.validate()?;

        // Every priced model must be routable to a provider.
        for model in self.pricing.models.keys() {
            if self.providers.provider_for_model(model).is_none() {
                return Err(ConfigError::Validation(format!(
                    "model '{model}' has pricing but no provider serves it \
                     (add it to a provider's `models` or set providers.default_provider)"
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand `${VAR}` references, leaving anything after a `#` comment marker untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("invalid interpolation pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GatewayConfig::from_str("").unwrap();

        assert_eq!(config.server.port, 8080);
        assert!(matches!(config.cache, CacheConfig::Memory(_)));
        assert_eq!(config.auth.identity_header, "x-user-id");
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = GatewayConfig::from_str(
            r#"
            [server]
            port = 9000
            streaming_idle_timeout_secs = 30

            [database]
            type = "sqlite"
            path = ":memory:"

            [cache]
            type = "memory"

            [auth]
            identity_header = "x-forwarded-user"

            [rate_limits]
            default_tier = "economy"

            [rate_limits.models]
            "gpt-4o" = "premium"
            "o3" = "reasoning"

            [rate_limits.tiers.premium]
            limit = 5
            window_secs = 120

            [pricing]
            markup = "1.5"
            default_carbon_grams_per_1k_tokens = 0.25

            [pricing.cohorts]
            family = "0"

            [pricing.models."gpt-4o"]
            input_per_1m_tokens = 2500000
            output_per_1m_tokens = 10000000
            carbon_grams_per_1k_tokens = 0.4

            [providers]
            default_provider = "openai"

            [providers.openai]
            type = "open_ai"
            api_key = "sk-test"
            allowed_models = ["gpt-4o"]

            [assistants.tutor]
            name = "Tutor"
            system_prompt = "You are a patient tutor."
        "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.streaming_idle_timeout_secs, 30);
        assert_eq!(config.auth.identity_header, "x-forwarded-user");
        assert_eq!(config.rate_limits.default_tier, Tier::Economy);
        assert_eq!(config.rate_limits.tier_for_model("gpt-4o"), Tier::Premium);
        assert_eq!(config.rate_limits.tier_for_model("unknown"), Tier::Economy);
        assert_eq!(config.rate_limits.tiers.get(Tier::Premium).limit, 5);
        assert_eq!(config.rate_limits.tiers.get(Tier::Premium).window_secs, 120);
        assert_eq!(config.pricing.models.len(), 1);
        assert_eq!(
            config.providers.provider_for_model("gpt-4o").map(|(n, _)| n),
            Some("openai")
        );
        assert!(config.assistants.get("tutor").is_some());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = GatewayConfig::from_str(
            r#"
            [server]
            not_a_field = true
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_priced_model_without_provider_rejected() {
        let result = GatewayConfig::from_str(
            r#"
            [pricing.models."orphan"]
            input_per_1m_tokens = 1
            output_per_1m_tokens = 1
        "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_API_KEY", Some("sk-secret"), || {
            let result = expand_env_vars("key = \"${TEST_API_KEY}\"").unwrap();
            assert_eq!(result, "key = \"sk-secret\"");
        });
    }

    #[test]
    fn test_missing_env_var_errors() {
        temp_env::with_var_unset("CREDITGATE_SURELY_UNSET", || {
            let result = expand_env_vars("key = \"${CREDITGATE_SURELY_UNSET}\"");
            assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "CREDITGATE_SURELY_UNSET"));
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# api_key = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# api_key = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("key = \"value\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "key = \"value\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_multiline_with_comments() {
        temp_env::with_var("TEST_MULTI", Some("value1"), || {
            let input = r#"key1 = "${TEST_MULTI}"
# key2 = "${NONEXISTENT}"
key3 = "literal""#;
            let result = expand_env_vars(input).unwrap();
            assert_eq!(
                result,
                r#"key1 = "value1"
# key2 = "${NONEXISTENT}"
key3 = "literal""#
            );
        });
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creditgate.toml");
        std::fs::write(&path, "[server]\nport = 7070\n").unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.server.port, 7070);

        let missing = GatewayConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io(_, _))));
    }
}
