//! Access token sources for the mail backend.
//!
//! The core only asks for an access token per request. Minting, caching and
//! refreshing live here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CredentialConfig;
use crate::error::AuthError;

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Something that can hand out a backend access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, AuthError>;
}

/// No credential configured: every request is unauthenticated.
pub struct NoCredentials;

#[async_trait]
impl TokenSource for NoCredentials {
    async fn access_token(&self) -> Result<SecretString, AuthError> {
        Err(AuthError::NotAuthenticated)
    }
}

/// A fixed, externally managed access token.
pub struct StaticToken {
    token: SecretString,
}

impl StaticToken {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<SecretString, AuthError> {
        if self.token.expose_secret().is_empty() {
            return Err(AuthError::NotAuthenticated);
        }
        Ok(self.token.clone())
    }
}

/// OAuth2 client credentials plus a long-lived refresh token.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

/// Mints access tokens with the `refresh_token` grant and caches them until
/// shortly before expiry.
pub struct RefreshTokenSource {
    config: OAuthClientConfig,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl RefreshTokenSource {
    pub fn new(config: OAuthClientConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            cached: Mutex::new(None),
        }
    }

    async fn refresh(&self) -> Result<CachedToken, AuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("refresh_token", self.config.refresh_token.expose_secret()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenEndpoint {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<TokenErrorResponse>(&body).ok();
            let rejected = status.as_u16() == 401
                || parsed.as_ref().is_some_and(|e| e.error == "invalid_grant");
            let reason = match parsed {
                Some(e) => e.error_description.unwrap_or(e.error),
                None => format!("token endpoint returned {status}"),
            };
            warn!(status = %status, reason = %reason, "Token refresh failed");
            return Err(if rejected {
                AuthError::SessionExpired { reason }
            } else {
                AuthError::TokenEndpoint { reason }
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| AuthError::TokenEndpoint {
            reason: format!("invalid token response: {e}"),
        })?;
        info!(expires_in = body.expires_in, "Access token refreshed");
        Ok(CachedToken {
            token: SecretString::from(body.access_token),
            expires_at: Utc::now() + Duration::seconds(body.expires_in - EXPIRY_MARGIN_SECS),
        })
    }
}

#[async_trait]
impl TokenSource for RefreshTokenSource {
    async fn access_token(&self) -> Result<SecretString, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            if current.expires_at > Utc::now() {
                return Ok(current.token.clone());
            }
            debug!("Cached access token expired");
        }

        let fresh = self.refresh().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Build the token source for the configured credentials.
pub fn token_source(credentials: CredentialConfig, http: reqwest::Client) -> Arc<dyn TokenSource> {
    match credentials {
        CredentialConfig::None => Arc::new(NoCredentials),
        CredentialConfig::Static(token) => Arc::new(StaticToken::new(token)),
        CredentialConfig::Refresh(oauth) => Arc::new(RefreshTokenSource::new(oauth, http)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_credentials_is_unauthenticated() {
        assert!(matches!(
            NoCredentials.access_token().await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn static_token_is_returned() {
        let source = StaticToken::new(SecretString::from("ya29.token"));
        let token = source.access_token().await.unwrap();
        assert_eq!(token.expose_secret(), "ya29.token");
    }

    #[tokio::test]
    async fn empty_static_token_is_unauthenticated() {
        let source = StaticToken::new(SecretString::from(""));
        assert!(matches!(
            source.access_token().await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn token_source_follows_credentials() {
        let source = token_source(CredentialConfig::None, reqwest::Client::new());
        assert!(source.access_token().await.is_err());

        let source = token_source(
            CredentialConfig::Static(SecretString::from("abc")),
            reqwest::Client::new(),
        );
        assert_eq!(source.access_token().await.unwrap().expose_secret(), "abc");
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_endpoint_error() {
        let source = RefreshTokenSource::new(
            OAuthClientConfig {
                token_url: "http://127.0.0.1:1/token".into(),
                client_id: "id".into(),
                client_secret: SecretString::from("secret"),
                refresh_token: SecretString::from("refresh"),
            },
            reqwest::Client::new(),
        );
        assert!(matches!(
            source.access_token().await,
            Err(AuthError::TokenEndpoint { .. })
        ));
    }
}
