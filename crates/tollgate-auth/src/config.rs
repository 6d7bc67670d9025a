//! Token authority configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::token::SigningAlgorithm;

/// Root configuration for the token authority.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "https://auth.example.com"
///
/// [auth.tokens]
/// access_token_lifetime = "30m"
/// refresh_token_lifetime = "7d"
///
/// [auth.signing]
/// algorithm = "RS256"
/// rotation_interval = "30d"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL placed in the `iss` claim and the discovery document.
    pub issuer: String,

    /// Token lifetimes.
    pub tokens: TokenConfig,

    /// Signing key configuration.
    pub signing: SigningConfig,

    /// Allow self-service registration at `/api/v1/users/register`.
    pub registration_enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            tokens: TokenConfig::default(),
            signing: SigningConfig::default(),
            registration_enabled: true,
        }
    }
}

/// Token lifetime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// How long past `exp` introspection still reports a token as active.
    /// Never applies to access decisions.
    #[serde(with = "humantime_serde")]
    pub introspection_grace: Duration,

    /// How often expired refresh records are collected.
    #[serde(with = "humantime_serde")]
    pub refresh_cleanup_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(30 * 60),
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 3600),
            introspection_grace: Duration::from_secs(60),
            refresh_cleanup_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Signing key configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm for newly generated keys.
    pub algorithm: SigningAlgorithm,

    /// PKCS#8 private key PEM. When unset a key is generated at startup.
    pub private_key_path: Option<PathBuf>,

    /// SPKI public key PEM (required for RSA keys loaded from disk).
    pub public_key_path: Option<PathBuf>,

    /// Scheduled rotation interval. Disabled when unset.
    #[serde(default, with = "humantime_serde")]
    pub rotation_interval: Option<Duration>,

    /// Delay before retrying a failed scheduled rotation.
    #[serde(with = "humantime_serde")]
    pub rotation_retry_delay: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::RS256,
            private_key_path: None,
            public_key_path: None,
            rotation_interval: None,
            rotation_retry_delay: Duration::from_secs(30),
        }
    }
}

/// Upper bound for every configured token lifetime and grace window.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(366 * 24 * 3600);

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The issuer is not an absolute URL
    /// - A token lifetime is zero
    /// - The refresh lifetime does not exceed the access lifetime
    /// - A lifetime or the grace window exceeds `MAX_TOKEN_LIFETIME`
    /// - Only one of the key paths is set for an RSA key
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.issuer)
            .map_err(|e| ConfigError::InvalidValue(format!("issuer '{}': {e}", self.issuer)))?;

        for (name, value) in [
            ("access_token_lifetime", self.tokens.access_token_lifetime),
            ("refresh_token_lifetime", self.tokens.refresh_token_lifetime),
            ("introspection_grace", self.tokens.introspection_grace),
        ] {
            if value > MAX_TOKEN_LIFETIME {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must not exceed {} days",
                    MAX_TOKEN_LIFETIME.as_secs() / 86_400
                )));
            }
        }
        if self.tokens.access_token_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "access_token_lifetime must be > 0".to_string(),
            ));
        }
        if self.tokens.refresh_token_lifetime <= self.tokens.access_token_lifetime {
            return Err(ConfigError::InvalidValue(
                "refresh_token_lifetime must exceed access_token_lifetime".to_string(),
            ));
        }
        if self.tokens.refresh_cleanup_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "refresh_cleanup_interval must be > 0".to_string(),
            ));
        }
        if self.signing.rotation_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidValue(
                "rotation_interval must be > 0 when set".to_string(),
            ));
        }
        if self.signing.algorithm.is_rsa()
            && self.signing.private_key_path.is_some()
            && self.signing.public_key_path.is_none()
        {
            return Err(ConfigError::InvalidValue(
                "RSA private_key_path requires public_key_path".to_string(),
            ));
        }
        Ok(())
    }

    /// How long a retired key must stay published: long enough for every
    /// token it signed to expire, plus the introspection grace window.
    #[must_use]
    pub fn retired_key_retention(&self) -> Duration {
        self.tokens
            .access_token_lifetime
            .max(self.tokens.refresh_token_lifetime)
            + self.tokens.introspection_grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AuthConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tokens.access_token_lifetime, Duration::from_secs(1800));
        assert_eq!(config.signing.algorithm, SigningAlgorithm::RS256);
    }

    #[test]
    fn test_lifetimes_are_bounded() {
        let mut config = AuthConfig::default();
        config.tokens.refresh_token_lifetime = Duration::from_secs(u64::MAX);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("refresh_token_lifetime"));

        let mut config = AuthConfig::default();
        config.tokens.introspection_grace = MAX_TOKEN_LIFETIME + Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = AuthConfig::default();
        config.tokens.refresh_token_lifetime = MAX_TOKEN_LIFETIME;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_humantime_durations() {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "issuer": "https://auth.example.com",
            "tokens": { "access_token_lifetime": "15m", "refresh_token_lifetime": "2days" },
            "signing": { "algorithm": "ES384", "rotation_interval": "30days" }
        }))
        .unwrap();

        assert_eq!(config.tokens.access_token_lifetime, Duration::from_secs(900));
        assert_eq!(config.tokens.refresh_token_lifetime, Duration::from_secs(2 * 86400));
        assert_eq!(config.signing.algorithm, SigningAlgorithm::ES384);
        assert_eq!(
            config.signing.rotation_interval,
            Some(Duration::from_secs(30 * 86400))
        );
        // Unspecified fields keep their defaults
        assert_eq!(config.tokens.introspection_grace, Duration::from_secs(60));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AuthConfig::default();
        config.issuer = "not a url".into();
        assert!(config.validate().is_err());

        let mut config = AuthConfig::default();
        config.tokens.refresh_token_lifetime = config.tokens.access_token_lifetime;
        assert!(config.validate().is_err());

        let mut config = AuthConfig::default();
        config.signing.private_key_path = Some("key.pem".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retired_key_retention() {
        let config = AuthConfig::default();
        assert_eq!(
            config.retired_key_retention(),
            Duration::from_secs(7 * 24 * 3600 + 60)
        );
    }
}
