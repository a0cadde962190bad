//! `OAuth2` token types.

use std::collections::BTreeSet;

use chrono::{DateTime, Local, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Lifetime, ProviderExpiry};
use crate::error::{Error, Result};

/// `OAuth2` access token with metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Access token string.
    pub access_token: String,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// Absolute expiration instant, always UTC.
    pub expires_at: DateTime<Utc>,
    /// Refresh token for obtaining new access tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scopes granted by the authorization server.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl Token {
    /// Creates a new token expiring at `expires_at`.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_at,
            refresh_token: None,
            scopes: BTreeSet::new(),
        }
    }

    /// Creates a token from a token endpoint response received at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the response has no access token or an
    /// unparseable expiry.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self> {
        if response.access_token.trim().is_empty() {
            return Err(Error::InvalidResponse("empty access_token".into()));
        }

        let expiry = response.provider_expiry()?;
        let lifetime = Lifetime::compute(&expiry, now);
        let scopes = parse_scopes(response.scope.as_deref().unwrap_or_default());

        debug!(
            expires_in = lifetime.expires_in,
            scope_count = scopes.len(),
            has_refresh_token = response.refresh_token.is_some(),
            "Parsed token response"
        );

        Ok(Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_at: lifetime.expires_at,
            refresh_token: response.refresh_token,
            scopes,
        })
    }

    /// Time left before expiry, negative once expired.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        self.expires_at - now
    }

    /// Checks if the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Checks if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Checks if the token expires within `window` of `now`.
    #[must_use]
    pub fn expires_within(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        self.remaining(now) < window
    }

    /// Returns true if the scope was granted.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the granted scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the refresh token if available.
    ///
    /// # Errors
    ///
    /// Returns an error if no refresh token is available.
    pub fn refresh_token(&self) -> Result<&str> {
        self.refresh_token.as_deref().ok_or(Error::NoRefreshToken)
    }

    /// Expiry in the local time zone, for display.
    #[must_use]
    pub fn expires_at_local(&self) -> DateTime<Local> {
        self.expires_at.with_timezone(&Local)
    }
}

/// Splits a space-separated scope string.
#[must_use]
pub fn parse_scopes(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Absolute expiry as some providers send it: epoch seconds or a timestamp.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExpiryValue {
    /// Unix epoch seconds.
    Epoch(i64),
    /// Timestamp string, with or without zone designator.
    Text(String),
}

/// Token response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type.
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Absolute expiry, when the provider sends one instead of `expires_in`.
    #[serde(default, alias = "expiry", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<ExpiryValue>,
    /// Refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Expiry as reported, before any arithmetic. `expires_in` wins when both
    /// fields are present.
    ///
    /// # Errors
    ///
    /// Returns an error if `expires_at` cannot be parsed.
    pub fn provider_expiry(&self) -> Result<ProviderExpiry> {
        if let Some(secs) = self.expires_in {
            return Ok(ProviderExpiry::Relative(secs));
        }
        match &self.expires_at {
            Some(ExpiryValue::Epoch(epoch)) => DateTime::from_timestamp(*epoch, 0)
                .map(|instant| ProviderExpiry::Aware(instant.fixed_offset()))
                .ok_or_else(|| Error::InvalidResponse(format!("expiry out of range: {epoch}"))),
            Some(ExpiryValue::Text(raw)) => ProviderExpiry::parse_timestamp(raw),
            None => Ok(ProviderExpiry::Missing),
        }
    }
}

/// Error response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an Error.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::oauth_error(self.error, self.error_description)
    }
}

/// Token introspection result (Google `tokeninfo`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenInfo {
    /// Space-separated granted scopes.
    #[serde(default)]
    pub scope: String,
    /// Email the token was issued for.
    #[serde(default)]
    pub email: Option<String>,
    /// Seconds left before the token expires.
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Client id the token was issued to.
    #[serde(default, alias = "aud")]
    pub audience: Option<String>,
}

impl TokenInfo {
    /// Granted scopes as a set.
    #[must_use]
    pub fn scopes(&self) -> BTreeSet<String> {
        parse_scopes(&self.scope)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;
    use crate::clock::FALLBACK_LIFETIME_SECS;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_token_creation() {
        let token = Token::new("access123", "Bearer", now());
        assert_eq!(token.access_token, "access123");
        assert_eq!(token.token_type, "Bearer");
        assert!(token.refresh_token.is_none());
        assert!(token.scopes.is_empty());
    }

    #[test]
    fn test_token_with_refresh() {
        let token = Token::new("access123", "Bearer", now()).with_refresh_token("refresh456");
        assert_eq!(token.refresh_token().unwrap(), "refresh456");
    }

    #[test]
    fn test_missing_refresh_token() {
        let token = Token::new("access123", "Bearer", now());
        assert!(matches!(token.refresh_token(), Err(Error::NoRefreshToken)));
    }

    #[test]
    fn test_token_expiration() {
        let at = now();
        let token = Token::new("access123", "Bearer", at + TimeDelta::seconds(240));

        assert!(!token.is_expired_at(at));
        assert!(token.expires_within(at, TimeDelta::minutes(5)));
        assert!(!token.expires_within(at, TimeDelta::minutes(3)));
        assert!(token.is_expired_at(at + TimeDelta::seconds(240)));
        assert_eq!(token.remaining(at).num_seconds(), 240);
    }

    #[test]
    fn test_token_from_response() {
        let response: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "ya29.test",
                "token_type": "Bearer",
                "expires_in": 3599,
                "refresh_token": "1//refresh",
                "scope": "https://mail.google.com/ https://www.googleapis.com/auth/userinfo.email"
            }"#,
        )
        .unwrap();

        let token = Token::from_response(response, now()).unwrap();
        assert_eq!(token.access_token, "ya29.test");
        assert_eq!(token.expires_at, now() + TimeDelta::seconds(3599));
        assert!(token.has_scope("https://mail.google.com/"));
        assert_eq!(token.scopes.len(), 2);
    }

    #[test]
    fn test_naive_expiry_field() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token": "abc", "expiry": "2024-05-01T13:00:00"}"#,
        )
        .unwrap();

        let token = Token::from_response(response, now()).unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.remaining(now()).num_seconds(), 3600);
    }

    #[test]
    fn test_missing_expiry_uses_fallback() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        let token = Token::from_response(response, now()).unwrap();
        assert_eq!(
            token.remaining(now()).num_seconds(),
            FALLBACK_LIFETIME_SECS
        );
    }

    #[test]
    fn test_empty_access_token_rejected() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token": "  ", "expires_in": 3600}"#).unwrap();
        assert!(matches!(
            Token::from_response(response, now()),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_token_json_roundtrip_keeps_utc() {
        let token = Token::new("a", "Bearer", now())
            .with_refresh_token("r")
            .with_scopes(["https://mail.google.com/"]);
        let json = serde_json::to_string(&token).unwrap();
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_token_info_scopes() {
        let info: TokenInfo = serde_json::from_str(
            r#"{"scope": "openid https://mail.google.com/", "aud": "client.apps", "expires_in": 3000}"#,
        )
        .unwrap();
        assert!(info.scopes().contains("https://mail.google.com/"));
        assert_eq!(info.audience.as_deref(), Some("client.apps"));
    }
}
