use crate::rate_limiter::RateLimitConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use url::Url;

/// Flat variables accepted for compatibility with plain `.env` style deployments,
/// mapped to their configuration keys. They win over every other source.
const LEGACY_OVERRIDES: [(&str, &str); 4] = [
    ("PORT", "server.port"),
    ("TWILIO_ACCOUNT_SID", "providers.twilio.account_sid"),
    ("TWILIO_AUTH_TOKEN", "providers.twilio.auth_token"),
    ("TWILIO_PHONE_NUMBER", "providers.twilio.phone_number"),
];

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Provider configuration
    pub providers: ProvidersConfig,
    /// Request normalization and delegation settings
    pub gateway: GatewayConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 5000)
    pub port: u16,
}

/// Provider configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    pub twilio: TwilioConfig,
}

/// Twilio provider configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TwilioConfig {
    /// Twilio Account SID
    pub account_sid: String,
    /// Twilio Auth Token
    pub auth_token: String,
    /// Twilio-owned number every message and call is sent from
    pub phone_number: String,
    /// API base URL (default: https://api.twilio.com)
    pub base_url: String,
    /// Timeout for a single provider request in seconds (default: 30)
    pub request_timeout_seconds: u64,
}

/// Gateway behaviour configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatewayConfig {
    /// Prefix added to recipients without a leading `+` (default: +91)
    pub default_country_prefix: String,
    /// Instructions URL handed to the provider for outbound calls
    pub call_instructions_url: String,
}

/// Security configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    /// Key the limiter on proxy headers instead of the peer address (default: false)
    pub trust_forwarded_headers: bool,
    /// Maximum request body size in bytes (default: 1MB)
    pub max_body_size: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: json or pretty (default: json)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            phone_number: String::new(),
            base_url: "https://api.twilio.com".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_country_prefix: dial_core::DEFAULT_COUNTRY_PREFIX.to_string(),
            call_instructions_url: "http://demo.twilio.com/docs/voice.xml".to_string(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_headers: false,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&env::vars().collect())
    }

    /// Load configuration from files and the given environment variables
    pub fn load_from(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let run_mode = vars
            .get("RUN_MODE")
            .cloned()
            .unwrap_or_else(|| "development".into());

        let mut builder = Config::builder()
            // Start with default configuration
            .add_source(Config::try_from(&AppConfig::default())?)
            // Add configuration file based on environment
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (gitignored)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (prefixed with DIALGATE__)
            .add_source(
                Environment::with_prefix("DIALGATE")
                    .separator("__")
                    .source(Some(vars.clone())),
            );

        for (var, key) in LEGACY_OVERRIDES {
            builder = builder.set_override_option(key, vars.get(var).cloned())?;
        }

        builder.build()?.try_deserialize()
    }

    /// Refuse configurations the gateway cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let twilio = &self.providers.twilio;
        let missing: Vec<&str> = [
            ("TWILIO_ACCOUNT_SID", &twilio.account_sid),
            ("TWILIO_AUTH_TOKEN", &twilio.auth_token),
            ("TWILIO_PHONE_NUMBER", &twilio.phone_number),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Message(format!(
                "missing Twilio configuration: {}",
                missing.join(", ")
            )));
        }

        Url::parse(&twilio.base_url).map_err(|e| {
            ConfigError::Message(format!("providers.twilio.base_url is not a URL: {}", e))
        })?;
        Url::parse(&self.gateway.call_instructions_url).map_err(|e| {
            ConfigError::Message(format!("gateway.call_instructions_url is not a URL: {}", e))
        })?;
        if twilio.request_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "providers.twilio.request_timeout_seconds must be positive".into(),
            ));
        }

        self.rate_limit.validate().map_err(ConfigError::Message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn credentials() -> Vec<(&'static str, &'static str)> {
        vec![
            ("TWILIO_ACCOUNT_SID", "AC123"),
            ("TWILIO_AUTH_TOKEN", "token"),
            ("TWILIO_PHONE_NUMBER", "+15005550006"),
        ]
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::load_from(&HashMap::new()).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.gateway.default_country_prefix, "+91");
        assert_eq!(
            config.gateway.call_instructions_url,
            "http://demo.twilio.com/docs/voice.xml"
        );
        assert_eq!(config.rate_limit.sms.max_requests, 10);
        assert_eq!(config.rate_limit.call.max_requests, 5);
        assert_eq!(config.rate_limit.call.window_seconds, 900);
        assert!(!config.security.trust_forwarded_headers);
    }

    #[test]
    fn legacy_variables_are_honoured() {
        let mut pairs = credentials();
        pairs.push(("PORT", "8080"));
        let config = AppConfig::load_from(&vars(&pairs)).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.providers.twilio.account_sid, "AC123");
        assert_eq!(config.providers.twilio.phone_number, "+15005550006");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn prefixed_variables_reach_nested_sections() {
        let config = AppConfig::load_from(&vars(&[
            ("DIALGATE__RATE_LIMIT__SMS__MAX_REQUESTS", "20"),
            ("DIALGATE__GATEWAY__DEFAULT_COUNTRY_PREFIX", "+44"),
            ("DIALGATE__SECURITY__TRUST_FORWARDED_HEADERS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.rate_limit.sms.max_requests, 20);
        assert_eq!(config.rate_limit.call.max_requests, 5);
        assert_eq!(config.gateway.default_country_prefix, "+44");
        assert!(config.security.trust_forwarded_headers);
    }

    #[test]
    fn legacy_port_wins_over_prefixed_port() {
        let config = AppConfig::load_from(&vars(&[
            ("DIALGATE__SERVER__PORT", "7000"),
            ("PORT", "7001"),
        ]))
        .unwrap();
        assert_eq!(config.server.port, 7001);
    }

    #[test]
    fn missing_credentials_are_listed() {
        let config = AppConfig::load_from(&vars(&[("TWILIO_ACCOUNT_SID", "AC123")])).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("TWILIO_AUTH_TOKEN"));
        assert!(err.contains("TWILIO_PHONE_NUMBER"));
        assert!(!err.contains("TWILIO_ACCOUNT_SID"));
    }

    #[test]
    fn invalid_instructions_url_is_rejected() {
        let mut pairs = credentials();
        pairs.push(("DIALGATE__GATEWAY__CALL_INSTRUCTIONS_URL", "not a url"));
        let config = AppConfig::load_from(&vars(&pairs)).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("call_instructions_url"));
    }
}
