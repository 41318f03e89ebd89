//! Connections between a client and one external marketing platform
//!
//! A [`Connection`] is the stored credential plus the selection metadata for
//! one platform. Its `status` is stored intent; whether the credential is
//! still usable is [`Connection::health`], a pure function of time.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::id::{ClientId, ConnectionId, UserId};

/// Metadata key for the selected sub-resource id (property, ad account)
pub const RESOURCE_ID_KEY: &str = "resource_id";
/// Metadata key for the selected sub-resource display name
pub const RESOURCE_NAME_KEY: &str = "resource_name";

/// Days before expiry at which a connection starts reporting a warning
pub const DEFAULT_WARNING_DAYS: i64 = 7;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Supported external platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    GoogleAnalytics,
    GoogleAds,
    MetaAds,
}

/// Grouping used when a caller asks for "all analytics" or "all ads" data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlatformFamily {
    Analytics,
    Advertising,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::GoogleAnalytics, Platform::GoogleAds, Platform::MetaAds];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::GoogleAnalytics => "google_analytics",
            Platform::GoogleAds => "google_ads",
            Platform::MetaAds => "meta_ads",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::GoogleAnalytics => "Google Analytics",
            Platform::GoogleAds => "Google Ads",
            Platform::MetaAds => "Meta Ads",
        }
    }

    pub fn family(&self) -> PlatformFamily {
        match self {
            Platform::GoogleAnalytics => PlatformFamily::Analytics,
            Platform::GoogleAds | Platform::MetaAds => PlatformFamily::Advertising,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                CoreError::validation(
                    "platform",
                    format!(
                        "Unknown platform '{}'. Expected one of: {}",
                        s,
                        Platform::ALL.map(|p| p.as_str()).join(", ")
                    ),
                )
            })
    }
}

/// Stored lifecycle status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Active,
    Expired,
    Error,
    Disconnected,
}

impl ConnectionStatus {
    /// Whether the app should still attempt calls with this connection
    pub fn is_live(&self) -> bool {
        !matches!(self, ConnectionStatus::Disconnected)
    }
}

/// Derived health bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Expired,
}

/// Display-time view of how close a credential is to expiring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionHealth {
    pub status: HealthStatus,
    pub message: String,
    pub days_until_expiry: i64,
}

/// Bearer material handed to platform adapters
#[derive(Debug, Clone)]
pub struct Credential {
    pub platform: Platform,
    pub access_token: String,
    /// Selected property / ad account, if the user picked one
    pub resource_id: Option<String>,
}

/// A stored link between a client and one external platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub client_id: ClientId,
    pub owner_id: UserId,
    pub platform: Platform,

    pub access_token: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    pub expires_at: DateTime<Utc>,

    pub status: ConnectionStatus,

    /// Platform-specific selection, see [`RESOURCE_ID_KEY`] and [`RESOURCE_NAME_KEY`]
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(
        client_id: ClientId,
        owner_id: UserId,
        platform: Platform,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ConnectionId::generate(),
            client_id,
            owner_id,
            platform,
            access_token,
            refresh_token,
            expires_at,
            status: ConnectionStatus::Active,
            metadata: HashMap::new(),
            last_synced_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn credential(&self) -> Credential {
        Credential {
            platform: self.platform,
            access_token: self.access_token.clone(),
            resource_id: self.resource_id().map(str::to_string),
        }
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.metadata.get(RESOURCE_ID_KEY).map(String::as_str)
    }

    pub fn resource_name(&self) -> Option<&str> {
        self.metadata.get(RESOURCE_NAME_KEY).map(String::as_str)
    }

    pub fn set_resource(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.metadata.insert(RESOURCE_ID_KEY.to_string(), id.into());
        self.metadata.insert(RESOURCE_NAME_KEY.to_string(), name.into());
        self.updated_at = Utc::now();
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Check if the token needs refresh (within 5 minutes of expiry)
    pub fn needs_refresh(&self) -> bool {
        let time_until_expiry = self.expires_at.signed_duration_since(Utc::now());
        time_until_expiry.num_seconds() < 300
    }

    /// Status as seen by a reader right now. Expiry is computed, never swept.
    pub fn effective_status(&self) -> ConnectionStatus {
        match self.status {
            ConnectionStatus::Active | ConnectionStatus::Connected if self.is_expired() => {
                ConnectionStatus::Expired
            }
            status => status,
        }
    }

    /// Update the token after refresh
    pub fn update_from_refresh(
        &mut self,
        new_access_token: String,
        new_refresh_token: Option<String>,
        new_expires_at: DateTime<Utc>,
    ) {
        self.access_token = new_access_token;
        if new_refresh_token.is_some() {
            self.refresh_token = new_refresh_token;
        }
        self.expires_at = new_expires_at;
        self.status = ConnectionStatus::Active;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.status = ConnectionStatus::Error;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    pub fn mark_synced(&mut self) {
        let now = Utc::now();
        self.last_synced_at = Some(now);
        self.updated_at = now;
    }

    pub fn health(&self) -> ConnectionHealth {
        connection_health(self.expires_at, Utc::now(), DEFAULT_WARNING_DAYS)
    }
}

/// Health of a credential expiring at `expires_at`, observed at `now`.
///
/// Expired strictly after the expiry instant. Days are rounded up, so a
/// credential with 6.2 days left reports 7 and sits inside the warning band.
pub fn connection_health(
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    warning_days: i64,
) -> ConnectionHealth {
    let remaining = expires_at.signed_duration_since(now);
    let days_until_expiry = ceil_days(remaining);

    if now > expires_at {
        return ConnectionHealth {
            status: HealthStatus::Expired,
            message: "Connection expired. Please reconnect.".to_string(),
            days_until_expiry,
        };
    }

    if days_until_expiry <= warning_days {
        let message = match days_until_expiry {
            0 => "Connection expires today".to_string(),
            1 => "Connection expires in 1 day".to_string(),
            n => format!("Connection expires in {} days", n),
        };
        return ConnectionHealth {
            status: HealthStatus::Warning,
            message,
            days_until_expiry,
        };
    }

    ConnectionHealth {
        status: HealthStatus::Healthy,
        message: "Connection is healthy".to_string(),
        days_until_expiry,
    }
}

fn ceil_days(remaining: Duration) -> i64 {
    let millis = remaining.num_milliseconds();
    let days = millis.div_euclid(MILLIS_PER_DAY);
    if millis.rem_euclid(MILLIS_PER_DAY) == 0 {
        days
    } else {
        days + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_health_exactly_seven_days_is_warning() {
        let now = fixed_now();
        let health = connection_health(now + Duration::days(7), now, DEFAULT_WARNING_DAYS);
        assert_eq!(health.status, HealthStatus::Warning);
        assert_eq!(health.days_until_expiry, 7);
    }

    #[test]
    fn test_health_just_over_seven_days_is_healthy() {
        let now = fixed_now();
        let health = connection_health(
            now + Duration::days(7) + Duration::seconds(1),
            now,
            DEFAULT_WARNING_DAYS,
        );
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.days_until_expiry, 8);
    }

    #[test]
    fn test_health_exactly_at_expiry_is_warning_not_expired() {
        let now = fixed_now();
        let health = connection_health(now, now, DEFAULT_WARNING_DAYS);
        assert_eq!(health.status, HealthStatus::Warning);
        assert_eq!(health.days_until_expiry, 0);
        assert_eq!(health.message, "Connection expires today");
    }

    #[test]
    fn test_health_one_millisecond_past_expiry_is_expired() {
        let now = fixed_now();
        let health = connection_health(
            now - Duration::milliseconds(1),
            now,
            DEFAULT_WARNING_DAYS,
        );
        assert_eq!(health.status, HealthStatus::Expired);
        assert!(health.days_until_expiry <= 0);
    }

    #[test]
    fn test_health_partial_day_rounds_up() {
        let now = fixed_now();
        let health = connection_health(now + Duration::hours(30), now, DEFAULT_WARNING_DAYS);
        assert_eq!(health.days_until_expiry, 2);
        assert_eq!(health.message, "Connection expires in 2 days");
    }

    #[test]
    fn test_effective_status_is_lazy() {
        let mut conn = Connection::new(
            ClientId::generate(),
            UserId::generate(),
            Platform::MetaAds,
            "token".to_string(),
            None,
            Utc::now() - Duration::minutes(1),
        );
        assert_eq!(conn.status, ConnectionStatus::Active);
        assert_eq!(conn.effective_status(), ConnectionStatus::Expired);

        conn.mark_error("refresh revoked");
        assert_eq!(conn.effective_status(), ConnectionStatus::Error);
    }

    #[test]
    fn test_token_refresh_window() {
        let mut conn = Connection::new(
            ClientId::generate(),
            UserId::generate(),
            Platform::GoogleAds,
            "token".to_string(),
            Some("refresh".to_string()),
            Utc::now() + Duration::minutes(10),
        );
        assert!(!conn.needs_refresh());

        conn.expires_at = Utc::now() + Duration::minutes(4);
        assert!(conn.needs_refresh());
        assert!(!conn.is_expired());

        conn.update_from_refresh("fresh".to_string(), None, Utc::now() + Duration::hours(1));
        assert_eq!(conn.refresh_token.as_deref(), Some("refresh"));
        assert!(!conn.needs_refresh());
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!("meta_ads".parse::<Platform>().unwrap(), Platform::MetaAds);
        assert!("tiktok".parse::<Platform>().is_err());
        assert_eq!(Platform::GoogleAds.family(), PlatformFamily::Advertising);
    }
}
