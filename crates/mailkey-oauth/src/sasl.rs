//! SASL initial responses for IMAP `AUTHENTICATE` and SMTP `AUTH`.
//!
//! Implements:
//! - PLAIN (RFC 4616) for password accounts
//! - OAUTHBEARER (RFC 7628)
//! - XOAUTH2 (Google/Microsoft)
//!
//! The user part is the account email with surrounding whitespace removed;
//! servers compare it byte-for-byte with the address the token was issued for.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

/// Bearer-token SASL mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BearerMechanism {
    /// Google/Microsoft proprietary mechanism.
    #[default]
    XOAuth2,
    /// RFC 7628 mechanism.
    OAuthBearer,
}

impl BearerMechanism {
    /// Mechanism name as sent on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::XOAuth2 => "XOAUTH2",
            Self::OAuthBearer => "OAUTHBEARER",
        }
    }

    /// Base64 initial response for this mechanism.
    #[must_use]
    pub fn initial_response(self, user: &str, token: &str) -> String {
        match self {
            Self::XOAuth2 => xoauth2_response(user, token),
            Self::OAuthBearer => oauthbearer_response(user, token),
        }
    }
}

/// Generates PLAIN initial response: base64 of `\0<username>\0<password>`.
#[must_use]
pub fn plain_response(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{}\0{password}", username.trim()))
}

/// Generates OAUTHBEARER initial response:
/// base64 of `n,a=<user>,\x01auth=Bearer <token>\x01\x01`.
#[must_use]
pub fn oauthbearer_response(user: &str, token: &str) -> String {
    STANDARD.encode(format!(
        "n,a={},\x01auth=Bearer {token}\x01\x01",
        user.trim()
    ))
}

/// Generates XOAUTH2 initial response:
/// base64 of `user=<user>\x01auth=Bearer <token>\x01\x01`.
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    STANDARD.encode(format!("user={}\x01auth=Bearer {token}\x01\x01", user.trim()))
}

/// Error challenge a server sends back after rejecting a bearer token,
/// e.g. `{"status":"400","schemes":"Bearer","scope":"https://mail.google.com/"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BearerFailure {
    /// HTTP-style status code.
    pub status: String,
    /// Authentication schemes supported.
    #[serde(default)]
    pub schemes: String,
    /// Scope the server says is required.
    #[serde(default)]
    pub scope: Option<String>,
}

impl BearerFailure {
    /// Decodes a base64 server challenge; falls back to raw JSON.
    #[must_use]
    pub fn parse(challenge: &str) -> Option<Self> {
        let trimmed = challenge.trim();
        let decoded = STANDARD
            .decode(trimmed)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| trimmed.to_string());
        serde_json::from_str(&decoded).ok()
    }

    /// Google answers `400` with a scope for tokens it will not accept,
    /// including expired ones, so the wording alone does not prove a
    /// scope misconfiguration.
    #[must_use]
    pub fn names_scope(&self) -> bool {
        self.scope.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// `401` means the token itself was rejected.
    #[must_use]
    pub fn is_invalid_token(&self) -> bool {
        self.status == "401"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn decode(s: &str) -> String {
        String::from_utf8(STANDARD.decode(s).unwrap()).unwrap()
    }

    #[test]
    fn xoauth2_layout() {
        let decoded = decode(&xoauth2_response("user@gmail.com", "ya29.tok"));
        assert_eq!(decoded, "user=user@gmail.com\x01auth=Bearer ya29.tok\x01\x01");
    }

    #[test]
    fn oauthbearer_layout() {
        let decoded = decode(&oauthbearer_response("user@example.com", "tok"));
        assert_eq!(decoded, "n,a=user@example.com,\x01auth=Bearer tok\x01\x01");
    }

    #[test]
    fn user_whitespace_is_stripped() {
        let decoded = decode(&xoauth2_response("  user@gmail.com\n", "tok"));
        assert!(decoded.starts_with("user=user@gmail.com\x01"));
    }

    #[test]
    fn plain_layout() {
        let decoded = decode(&plain_response("me@example.org", "hunter2"));
        assert_eq!(decoded, "\0me@example.org\0hunter2");
    }

    #[test]
    fn mechanism_dispatch() {
        assert_eq!(BearerMechanism::default().name(), "XOAUTH2");
        assert_eq!(
            BearerMechanism::OAuthBearer.initial_response("a@b.c", "t"),
            oauthbearer_response("a@b.c", "t")
        );
    }

    #[test]
    fn parse_google_failure_challenge() {
        let raw = r#"{"status":"400","schemes":"Bearer","scope":"https://mail.google.com/"}"#;
        let encoded = STANDARD.encode(raw);

        let failure = BearerFailure::parse(&encoded).unwrap();
        assert_eq!(failure.status, "400");
        assert!(failure.names_scope());
        assert!(!failure.is_invalid_token());

        let plain = BearerFailure::parse(r#"{"status":"401","schemes":"bearer"}"#).unwrap();
        assert!(plain.is_invalid_token());
        assert!(!plain.names_scope());
    }

    #[test]
    fn parse_garbage_is_none() {
        assert!(BearerFailure::parse("+ go ahead").is_none());
    }
}
