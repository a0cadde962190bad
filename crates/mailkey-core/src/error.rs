//! Error types for the core library.

use thiserror::Error;

use crate::account::{AccountId, ValidationError};

/// Errors that can occur in core operations.
///
/// Sign-in failures name the step that failed so the message can be shown
/// to the user as-is.
#[derive(Debug, Error)]
pub enum Error {
    /// The provider rejected the authorization code or the exchange request
    /// failed. The user has to restart sign-in.
    #[error("Sign-in failed while exchanging the authorization code: {0}")]
    Exchange(#[source] mailkey_oauth::Error),

    /// The identity lookup failed; no account was created.
    #[error("Sign-in failed while fetching the account identity: {0}")]
    Identity(#[source] mailkey_oauth::Error),

    /// Account data failed validation.
    #[error("Sign-in failed validating the account: {0}")]
    Validation(ValidationError),

    /// Account settings failed validation.
    #[error("Invalid account settings: {}", join_messages(.0))]
    InvalidAccount(Vec<ValidationError>),

    /// The stored refresh token no longer works; the user must sign in again.
    #[error("Account {account} must be re-authenticated: {reason}")]
    ReauthRequired {
        /// Affected account.
        account: AccountId,
        /// Why the token could not be renewed.
        reason: String,
    },

    /// The mail server rejected the bearer token even after a refresh.
    #[error("Mail server rejected the credentials for account {account}: {message}")]
    ProtocolAuth {
        /// Affected account.
        account: AccountId,
        /// Server response.
        message: String,
    },

    /// The mail server could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The sign-in attempt was cancelled before it finished.
    #[error("Sign-in cancelled")]
    Cancelled,

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `OAuth2` configuration or request error outside the sign-in steps.
    #[error("OAuth error: {0}")]
    OAuth(#[from] mailkey_oauth::Error),

    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] crate::account::credentials::CredentialError),

    /// A background task panicked or was aborted.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Returns true when the user must go through sign-in again.
    #[must_use]
    pub const fn requires_reauth(&self) -> bool {
        matches!(self, Self::ReauthRequired { .. } | Self::Exchange(_))
    }
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
