//! Authorization-code flow against the platforms' token endpoints

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

use super::{PkceChallenge, TokenClient, TokenRequest, TokenResponse};
use crate::config::{BeaconConfig, PlatformConfig};
use crate::connection::Platform;
use crate::{CoreError, Result};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

const META_AUTH_URL: &str = "https://www.facebook.com/v19.0/dialog/oauth";
const META_TOKEN_URL: &str = "https://graph.facebook.com/v19.0/oauth/access_token";
const META_REVOKE_URL: &str = "https://graph.facebook.com/v19.0/me/permissions";

/// OAuth client configuration for one platform
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub platform: Platform,
    pub client_id: String,
    pub client_secret: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub revoke_endpoint: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Extra query parameters on the authorization URL
    pub auth_params: Vec<(String, String)>,
}

impl OAuthConfig {
    /// Public endpoints and read-only scopes for `platform`
    pub fn defaults(platform: Platform, redirect_uri: impl Into<String>) -> Self {
        let google_offline = vec![
            ("access_type".to_string(), "offline".to_string()),
            ("prompt".to_string(), "consent".to_string()),
        ];
        let (auth, token, revoke, scopes, auth_params) = match platform {
            Platform::GoogleAnalytics => (
                GOOGLE_AUTH_URL,
                GOOGLE_TOKEN_URL,
                GOOGLE_REVOKE_URL,
                vec!["https://www.googleapis.com/auth/analytics.readonly"],
                google_offline,
            ),
            Platform::GoogleAds => (
                GOOGLE_AUTH_URL,
                GOOGLE_TOKEN_URL,
                GOOGLE_REVOKE_URL,
                vec!["https://www.googleapis.com/auth/adwords"],
                google_offline,
            ),
            Platform::MetaAds => (
                META_AUTH_URL,
                META_TOKEN_URL,
                META_REVOKE_URL,
                vec!["ads_read", "read_insights"],
                Vec::new(),
            ),
        };

        Self {
            platform,
            client_id: String::new(),
            client_secret: String::new(),
            auth_endpoint: auth.to_string(),
            token_endpoint: token.to_string(),
            revoke_endpoint: revoke.to_string(),
            redirect_uri: redirect_uri.into(),
            scopes: scopes.into_iter().map(str::to_string).collect(),
            auth_params,
        }
    }

    /// Defaults overlaid with the configured application settings
    pub fn from_platform_config(
        platform: Platform,
        settings: &PlatformConfig,
        default_redirect_uri: &str,
    ) -> Self {
        let mut config = Self::defaults(
            platform,
            settings
                .redirect_uri
                .clone()
                .unwrap_or_else(|| default_redirect_uri.to_string()),
        );
        config.client_id = settings.client_id.clone();
        config.client_secret = settings.client_secret.clone();
        if !settings.scopes.is_empty() {
            config.scopes = settings.scopes.clone();
        }
        if let Some(url) = &settings.auth_url {
            config.auth_endpoint = url.clone();
        }
        if let Some(url) = &settings.token_url {
            config.token_endpoint = url.clone();
        }
        if let Some(url) = &settings.revoke_url {
            config.revoke_endpoint = url.clone();
        }
        config
    }

    /// Meta joins scopes with commas, Google with spaces
    fn scope_param(&self) -> String {
        match self.platform {
            Platform::MetaAds => self.scopes.join(","),
            Platform::GoogleAnalytics | Platform::GoogleAds => self.scopes.join(" "),
        }
    }

    /// Build the authorization URL the browser is sent to
    pub fn authorization_url(&self, state: &str, pkce: &PkceChallenge) -> Result<String> {
        if self.client_id.is_empty() {
            return Err(CoreError::validation(
                "platform",
                format!("{} is not configured on this server", self.platform),
            ));
        }

        let mut url = url::Url::parse(&self.auth_endpoint).map_err(|e| {
            CoreError::oauth(
                self.platform,
                "authorization_url",
                format!("Invalid authorization endpoint '{}': {}", self.auth_endpoint, e),
            )
        })?;

        let scope = self.scope_param();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &scope)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state)
            .extend_pairs(self.auth_params.iter());
        Ok(url.into())
    }
}

/// Generate PKCE code verifier (64 random bytes, base64url encoded)
pub fn generate_code_verifier() -> String {
    let mut random_bytes = vec![0u8; 64];
    rand::rng().fill(&mut random_bytes[..]);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Generate PKCE code challenge from verifier (SHA256 hash, base64url encoded)
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Random nonce binding a callback to the request that started it
pub fn generate_nonce() -> String {
    let mut random_bytes = vec![0u8; 32];
    rand::rng().fill(&mut random_bytes[..]);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Token client talking to the real platform endpoints over HTTP
#[derive(Debug, Clone)]
pub struct HttpTokenClient {
    configs: HashMap<Platform, OAuthConfig>,
    http_client: reqwest::Client,
}

impl HttpTokenClient {
    pub fn new(configs: impl IntoIterator<Item = OAuthConfig>) -> Self {
        Self {
            configs: configs.into_iter().map(|c| (c.platform, c)).collect(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &BeaconConfig) -> Self {
        let redirect = config.default_redirect_uri();
        Self::new(Platform::ALL.into_iter().map(|platform| {
            OAuthConfig::from_platform_config(platform, config.platforms.get(platform), &redirect)
        }))
    }

    fn config(&self, platform: Platform) -> Result<&OAuthConfig> {
        self.configs.get(&platform).ok_or_else(|| {
            CoreError::validation(
                "platform",
                format!("{} is not configured on this server", platform),
            )
        })
    }

    fn form_for(config: &OAuthConfig, request: &TokenRequest) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("client_id", config.client_id.clone()),
            ("client_secret", config.client_secret.clone()),
        ];
        match request {
            TokenRequest::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                form.push(("grant_type", "authorization_code".to_string()));
                form.push(("code", code.clone()));
                form.push(("redirect_uri", redirect_uri.clone()));
                form.push(("code_verifier", code_verifier.clone()));
            }
            TokenRequest::RefreshToken { refresh_token } => {
                form.push(("grant_type", "refresh_token".to_string()));
                form.push(("refresh_token", refresh_token.clone()));
            }
            TokenRequest::ExchangeToken { fb_exchange_token } => {
                form.push(("grant_type", "fb_exchange_token".to_string()));
                form.push(("fb_exchange_token", fb_exchange_token.clone()));
            }
        }
        form
    }

    #[tracing::instrument(skip(self, request), fields(platform = %platform))]
    async fn exchange_tokens(
        &self,
        platform: Platform,
        operation: &'static str,
        request: TokenRequest,
    ) -> Result<TokenResponse> {
        let config = self.config(platform)?;
        let form = Self::form_for(config, &request);

        let response = self
            .http_client
            .post(&config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                CoreError::transient(config.token_endpoint.as_str(), operation, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_token_error(platform, operation, status, &error_text));
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            CoreError::oauth(
                platform,
                "token_parse",
                format!("Failed to parse token response: {}", e),
            )
        })
    }
}

/// Map a failed token endpoint response onto the error taxonomy
pub fn classify_token_error(
    platform: Platform,
    operation: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> CoreError {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return CoreError::transient(
            platform.as_str(),
            operation,
            format!("HTTP {}: {}", status, body),
        );
    }

    // invalid_grant: the refresh credential was revoked or has expired
    if status == reqwest::StatusCode::UNAUTHORIZED
        || body.contains("invalid_grant")
        || body.contains("OAuthException")
    {
        return CoreError::auth_failure(platform, format!("HTTP {}: {}", status, body));
    }

    CoreError::oauth(
        platform,
        operation,
        format!("Token endpoint returned {}: {}", status, body),
    )
}

#[async_trait]
impl TokenClient for HttpTokenClient {
    fn authorization_url(
        &self,
        platform: Platform,
        state: &str,
        pkce: &PkceChallenge,
    ) -> Result<String> {
        self.config(platform)?.authorization_url(state, pkce)
    }

    async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        pkce: &PkceChallenge,
    ) -> Result<TokenResponse> {
        let redirect_uri = self.config(platform)?.redirect_uri.clone();
        self.exchange_tokens(
            platform,
            "token_exchange",
            TokenRequest::AuthorizationCode {
                code: code.to_string(),
                redirect_uri,
                code_verifier: pkce.verifier.clone(),
            },
        )
        .await
    }

    async fn refresh(&self, platform: Platform, credential: &str) -> Result<TokenResponse> {
        let request = match platform {
            Platform::MetaAds => TokenRequest::ExchangeToken {
                fb_exchange_token: credential.to_string(),
            },
            Platform::GoogleAnalytics | Platform::GoogleAds => TokenRequest::RefreshToken {
                refresh_token: credential.to_string(),
            },
        };
        self.exchange_tokens(platform, "token_refresh", request).await
    }

    #[tracing::instrument(skip(self, token), fields(platform = %platform))]
    async fn revoke(&self, platform: Platform, token: &str) -> Result<()> {
        let config = self.config(platform)?;
        let request = match platform {
            Platform::MetaAds => self
                .http_client
                .delete(&config.revoke_endpoint)
                .query(&[("access_token", token)]),
            Platform::GoogleAnalytics | Platform::GoogleAds => self
                .http_client
                .post(&config.revoke_endpoint)
                .form(&[("token", token)]),
        };

        let response = request.send().await.map_err(|e| {
            CoreError::transient(config.revoke_endpoint.as_str(), "revoke", e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::oauth(
                platform,
                "revoke",
                format!("Revocation returned {}: {}", status, body),
            ));
        }
        Ok(())
    }
}
