//! Application configuration.
//!
//! Loaded from `<config_dir>/mailkey/config.json` when present, then
//! overridden from the environment. Every field has a default, so a missing
//! file is not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use mailkey_oauth::OAuthClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::account::ProviderKind;
use crate::{Error, Result};

/// Redirect URI registered with the providers by default.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";

const APP_DIR: &str = "mailkey";

/// Client credentials registered with one `OAuth2` provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    /// Client ID.
    pub client_id: String,
    /// Client secret; desktop apps using PKCE may not have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// When and how hard the refresh guard tries to renew tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Tokens with less than this many seconds left are refreshed early.
    pub threshold_secs: i64,
    /// Retries after a transient refresh failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub initial_backoff_ms: u64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            threshold_secs: 300,
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

impl RefreshPolicy {
    /// The early-refresh window.
    #[must_use]
    ///
    /// Saturates for values [`Self::validate`] rejects.
    pub fn threshold(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.threshold_secs).unwrap_or(TimeDelta::MAX)
    }

    /// Checks the window is a non-negative duration chrono can represent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the bad value.
    pub fn validate(&self) -> Result<()> {
        if self.threshold_secs < 0 || TimeDelta::try_seconds(self.threshold_secs).is_none() {
            return Err(Error::Config(format!(
                "refresh.threshold_secs is out of range: {}",
                self.threshold_secs
            )));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64 << attempt.min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Redirect URI sent with authorization requests.
    pub redirect_uri: String,
    /// `SQLite` database location.
    pub database_path: PathBuf,
    /// Gmail client credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gmail: Option<OAuthAppConfig>,
    /// Outlook client credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlook: Option<OAuthAppConfig>,
    /// Yahoo client credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yahoo: Option<OAuthAppConfig>,
    /// Token refresh behavior.
    pub refresh: RefreshPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            database_path: default_database_path(),
            gmail: None,
            outlook: None,
            yahoo: None,
            refresh: RefreshPolicy::default(),
        }
    }
}

impl Config {
    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Loads the default config file, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::default_path()).await?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads a config file; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = tokio::fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        if let Err(Error::Config(reason)) = config.refresh.validate() {
            return Err(Error::Config(format!("{}: {reason}", path.display())));
        }
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Applies overrides from `lookup`, normally the process environment.
    ///
    /// Recognized keys: `OAUTH_REDIRECT_URI`, `SQLITE_DB_PATH`, and
    /// `<PROVIDER>_CLIENT_ID` / `<PROVIDER>_CLIENT_SECRET` for `GMAIL`,
    /// `OUTLOOK` and `YAHOO`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(uri) = get("OAUTH_REDIRECT_URI") {
            self.redirect_uri = uri;
        }
        if let Some(path) = get("SQLITE_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }

        for (prefix, slot) in [
            ("GMAIL", &mut self.gmail),
            ("OUTLOOK", &mut self.outlook),
            ("YAHOO", &mut self.yahoo),
        ] {
            if let Some(client_id) = get(&format!("{prefix}_CLIENT_ID")) {
                let previous_secret = slot.take().and_then(|app| app.client_secret);
                *slot = Some(OAuthAppConfig {
                    client_id,
                    client_secret: previous_secret,
                });
            }
            if let Some(secret) = get(&format!("{prefix}_CLIENT_SECRET"))
                && let Some(app) = slot.as_mut()
            {
                app.client_secret = Some(secret);
            }
        }
    }

    /// Client credentials for a provider, if configured.
    #[must_use]
    pub const fn oauth_app(&self, provider: ProviderKind) -> Option<&OAuthAppConfig> {
        match provider {
            ProviderKind::Gmail => self.gmail.as_ref(),
            ProviderKind::Outlook => self.outlook.as_ref(),
            ProviderKind::Yahoo => self.yahoo.as_ref(),
            ProviderKind::ICloud | ProviderKind::Custom => None,
        }
    }

    /// Builds an exchange client for a provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the provider has no `OAuth2` support or no
    /// client ID is configured.
    pub fn oauth_client(&self, provider: ProviderKind) -> Result<OAuthClient> {
        let endpoints = provider.oauth_provider()?.ok_or_else(|| {
            Error::Config(format!("{provider} does not support OAuth2 sign-in"))
        })?;
        let app = self.oauth_app(provider).ok_or_else(|| {
            Error::Config(format!(
                "No client ID configured for {provider}; set {}_CLIENT_ID",
                provider.as_str().to_uppercase()
            ))
        })?;

        let mut client = OAuthClient::new(app.client_id.clone(), endpoints)
            .with_redirect_uri(self.redirect_uri.clone());
        if let Some(secret) = &app.client_secret {
            client = client.with_client_secret(secret.clone());
        }
        Ok(client)
    }

    /// Database path as a string for the connection URL.
    #[must_use]
    pub fn database_url_path(&self) -> String {
        self.database_path.to_string_lossy().into_owned()
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("mailkey.db")
}
