//! Configuration types, read from the environment.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::auth::OAuthClientConfig;
use crate::backend::GmailConfig;
use crate::error::ConfigError;

const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// How the service obtains backend access tokens.
#[derive(Debug, Clone)]
pub enum CredentialConfig {
    None,
    Static(SecretString),
    Refresh(OAuthClientConfig),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub gmail: GmailConfig,
    pub credentials: CredentialConfig,
    /// Directory for daily log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = GmailConfig::default();

        let port = parse_or(&get, "INBOX_PANELS_PORT", 8080u16)?;
        let timeout_secs = parse_or(&get, "INBOX_PANELS_REQUEST_TIMEOUT_SECS", 15u64)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INBOX_PANELS_REQUEST_TIMEOUT_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        let gmail = GmailConfig {
            api_base: get("INBOX_PANELS_GMAIL_API_BASE").unwrap_or(defaults.api_base),
            batch_url: get("INBOX_PANELS_GMAIL_BATCH_URL").unwrap_or(defaults.batch_url),
            label: get("INBOX_PANELS_LABEL").unwrap_or(defaults.label),
            request_timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            bind: get("INBOX_PANELS_BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            gmail,
            credentials: credentials(&get)?,
            log_dir: get("INBOX_PANELS_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn credentials(get: &impl Fn(&str) -> Option<String>) -> Result<CredentialConfig, ConfigError> {
    if let Some(token) = get("GMAIL_ACCESS_TOKEN") {
        return Ok(CredentialConfig::Static(SecretString::from(token)));
    }

    let Some(refresh_token) = get("GMAIL_REFRESH_TOKEN") else {
        return Ok(CredentialConfig::None);
    };
    let require = |key: &str| {
        get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    };

    Ok(CredentialConfig::Refresh(OAuthClientConfig {
        token_url: get("INBOX_PANELS_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
        client_id: require("GMAIL_CLIENT_ID")?,
        client_secret: SecretString::from(require("GMAIL_CLIENT_SECRET")?),
        refresh_token: SecretString::from(refresh_token),
    }))
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
