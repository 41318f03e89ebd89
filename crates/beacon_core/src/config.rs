//! Configuration for Beacon
//!
//! Loaded from TOML. Every section has defaults so a missing file or a
//! partial one still yields a runnable configuration. Secrets can be supplied
//! through the environment instead of the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::{DEFAULT_WARNING_DAYS, Platform};
use crate::{CoreError, Result};

/// Environment variable overriding `server.jwt_secret`
pub const JWT_SECRET_ENV: &str = "BEACON_JWT_SECRET";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub server: ServerSection,
    pub database: DatabaseConfig,
    pub rate_limit: RateLimitConfig,
    pub health: HealthConfig,
    pub model: ModelConfig,
    pub platforms: PlatformsConfig,
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Server bind address (e.g., "127.0.0.1:8080")
    pub bind_address: String,

    /// Public base URL, used to build OAuth redirect URIs
    pub public_url: String,

    /// JWT secret for verifying bearer tokens
    pub jwt_secret: String,

    pub cors_origins: Vec<String>,

    /// Emit JSON log lines instead of the human format
    pub json_logs: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
            jwt_secret: "change-me-in-production".to_string(),
            cors_origins: vec!["*".to_string()],
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `memory` for the embedded engine, or a `ws://` / `wss://` endpoint
    pub url: String,
    pub namespace: String,
    pub database: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "memory".to_string(),
            namespace: "beacon".to_string(),
            database: "beacon".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Chat messages allowed per window
    pub max_messages: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub warning_days: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            warning_days: DEFAULT_WARNING_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier understood by the provider client
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Replaces the built-in assistant preamble when set
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(1024),
            system_prompt: None,
        }
    }
}

/// OAuth application settings for one platform
///
/// Endpoint fields are overrides; unset ones fall back to the platform's
/// public endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub client_id: String,
    pub client_secret: String,

    /// Defaults to `{server.public_url}/api/v1/connections/callback`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// Defaults to the platform's read-only scopes
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    /// Google Ads developer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_token: Option<String>,

    /// Google Ads manager account used as `login-customer-id`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_customer_id: Option<String>,
}

impl PlatformConfig {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub google_analytics: PlatformConfig,
    pub google_ads: PlatformConfig,
    pub meta_ads: PlatformConfig,
}

impl PlatformsConfig {
    pub fn get(&self, platform: Platform) -> &PlatformConfig {
        match platform {
            Platform::GoogleAnalytics => &self.google_analytics,
            Platform::GoogleAds => &self.google_ads,
            Platform::MetaAds => &self.meta_ads,
        }
    }

    fn get_mut(&mut self, platform: Platform) -> &mut PlatformConfig {
        match platform {
            Platform::GoogleAnalytics => &mut self.google_analytics,
            Platform::GoogleAds => &mut self.google_ads,
            Platform::MetaAds => &mut self.meta_ads,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Date range used when a caller does not give one
    pub default_lookback_days: i64,
    /// Items in the dashboard activity feed
    pub recent_activity_limit: usize,
    /// Upper bound on one adapter call before it counts as failed
    pub adapter_timeout_secs: u64,
}

impl AggregationConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            default_lookback_days: 30,
            recent_activity_limit: 10,
            adapter_timeout_secs: 20,
        }
    }
}

/// Standard config file locations
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("beacon.toml")];

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("beacon").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".beacon").join("config.toml"));
    }

    paths
}

/// Environment variable holding a platform's client secret
pub fn client_secret_env(platform: Platform) -> String {
    format!("{}_CLIENT_SECRET", platform.as_str().to_uppercase())
}

impl BeaconConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str, source: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CoreError::ConfigurationError {
            config_path: source.to_string(),
            field: "content".to_string(),
            expected: "valid TOML configuration".to_string(),
            cause: Box::new(e),
        })
    }

    /// Load configuration from a specific file, then apply environment overrides
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoreError::ConfigurationError {
                config_path: path.display().to_string(),
                field: "file".to_string(),
                expected: "readable TOML file".to_string(),
                cause: Box::new(e),
            }
        })?;

        let mut config = Self::from_toml(&content, &path.display().to_string())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the first standard location that exists, or defaults
    pub async fn load_or_default() -> Result<Self> {
        for path in config_paths() {
            if path.exists() {
                tracing::info!("Loading configuration from {}", path.display());
                return Self::load(&path).await;
            }
        }

        tracing::info!("No configuration file found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay secrets from the environment. `lookup` is injected for tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(JWT_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.server.jwt_secret = secret;
        }

        for platform in Platform::ALL {
            if let Some(secret) = lookup(&client_secret_env(platform)).filter(|s| !s.is_empty()) {
                self.platforms.get_mut(platform).client_secret = secret;
            }
        }
    }

    /// Redirect URI registered with every platform unless overridden
    pub fn default_redirect_uri(&self) -> String {
        format!(
            "{}/api/v1/connections/callback",
            self.server.public_url.trim_end_matches('/')
        )
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CoreError::ConfigurationError {
                    config_path: parent.display().to_string(),
                    field: "directory".to_string(),
                    expected: "writable directory".to_string(),
                    cause: Box::new(e),
                }
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "serialization".to_string(),
            expected: "serializable config structure".to_string(),
            cause: Box::new(e),
        })?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| CoreError::ConfigurationError {
                config_path: path.display().to_string(),
                field: "file".to_string(),
                expected: "writable file location".to_string(),
                cause: Box::new(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BeaconConfig::from_toml(
            r#"
            [rate_limit]
            max_messages = 5

            [platforms.meta_ads]
            client_id = "meta-app"
            "#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.rate_limit.max_messages, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.health.warning_days, 7);
        assert!(config.platforms.get(Platform::MetaAds).is_configured());
        assert!(!config.platforms.get(Platform::GoogleAds).is_configured());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = BeaconConfig::default();
        config.apply_env_overrides(|key| match key {
            "BEACON_JWT_SECRET" => Some("from-env".to_string()),
            "GOOGLE_ADS_CLIENT_SECRET" => Some("ads-secret".to_string()),
            _ => None,
        });

        assert_eq!(config.server.jwt_secret, "from-env");
        assert_eq!(config.platforms.google_ads.client_secret, "ads-secret");
        assert_eq!(config.platforms.meta_ads.client_secret, "");
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = BeaconConfig::from_toml("[server\nbind = ", "broken.toml").unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError { .. }));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("beacon-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");

        let mut config = BeaconConfig::default();
        config.aggregation.recent_activity_limit = 3;
        config.save(&path).await.unwrap();

        let loaded = BeaconConfig::load(&path).await.unwrap();
        assert_eq!(loaded.aggregation.recent_activity_limit, 3);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
