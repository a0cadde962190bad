//! Opening authenticated IMAP/SMTP sessions.
//!
//! The protocol clients themselves live outside this crate; they implement
//! [`SessionOpener`]. [`SessionManager`] supplies fresh credentials and
//! handles a server rejecting a token the guard believed was valid.

use std::future::Future;
use std::sync::Arc;

use mailkey_oauth::sasl::{self, BearerFailure, BearerMechanism};
use tracing::{debug, info, warn};

use crate::account::{Account, AccountId, AccountRepository};
use crate::backend::AuthBackend;
use crate::guard::RefreshGuard;
use crate::{Error, Result};

/// Mail protocol a session is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// IMAP.
    Imap,
    /// SMTP submission.
    Smtp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Imap => "IMAP",
            Self::Smtp => "SMTP",
        })
    }
}

/// Credentials handed to a [`SessionOpener`].
#[derive(Clone, PartialEq, Eq)]
pub enum SessionCredentials {
    /// `OAuth2` bearer token.
    Bearer {
        /// SASL user: the account email, trimmed.
        user: String,
        /// Access token.
        token: String,
        /// SASL mechanism to authenticate with.
        mechanism: BearerMechanism,
    },
    /// Username and password.
    Password {
        /// Login name.
        username: String,
        /// Password.
        password: String,
    },
}

impl SessionCredentials {
    /// Bearer credentials for `email`; surrounding whitespace is removed.
    #[must_use]
    pub fn bearer(email: &str, token: impl Into<String>) -> Self {
        Self::Bearer {
            user: email.trim().to_string(),
            token: token.into(),
            mechanism: BearerMechanism::default(),
        }
    }

    /// SASL mechanism name (`XOAUTH2`, `OAUTHBEARER` or `PLAIN`).
    #[must_use]
    pub const fn mechanism_name(&self) -> &'static str {
        match self {
            Self::Bearer { mechanism, .. } => mechanism.name(),
            Self::Password { .. } => "PLAIN",
        }
    }

    /// Base64 SASL initial response for this credential.
    #[must_use]
    pub fn initial_response(&self) -> String {
        match self {
            Self::Bearer {
                user,
                token,
                mechanism,
            } => mechanism.initial_response(user, token),
            Self::Password { username, password } => sasl::plain_response(username, password),
        }
    }

    /// The login or SASL user.
    #[must_use]
    pub fn user(&self) -> &str {
        match self {
            Self::Bearer { user, .. } => user,
            Self::Password { username, .. } => username,
        }
    }
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer {
                user, mechanism, ..
            } => f
                .debug_struct("Bearer")
                .field("user", user)
                .field("mechanism", mechanism)
                .finish_non_exhaustive(),
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Failure reported by a [`SessionOpener`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The server rejected the credentials. Carries the server's response,
    /// which for bearer mechanisms is usually a base64 JSON challenge.
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// The server could not be reached or the connection dropped.
    #[error("network error: {0}")]
    Network(String),
}

/// Connects and authenticates to a mail server.
pub trait SessionOpener: Send + Sync {
    /// Authenticated session handle.
    type Session: Send;

    /// Opens a session for `account` with `credentials`.
    fn open(
        &self,
        account: &Account,
        protocol: Protocol,
        credentials: &SessionCredentials,
    ) -> impl Future<Output = std::result::Result<Self::Session, SessionError>> + Send;
}

/// Opens sessions with valid credentials.
#[derive(Debug)]
pub struct SessionManager<B, O> {
    repo: AccountRepository,
    guard: Arc<RefreshGuard<B>>,
    opener: O,
}

impl<B: AuthBackend, O: SessionOpener> SessionManager<B, O> {
    /// Creates a manager.
    #[must_use]
    pub const fn new(repo: AccountRepository, guard: Arc<RefreshGuard<B>>, opener: O) -> Self {
        Self {
            repo,
            guard,
            opener,
        }
    }

    /// Opens a session for an account.
    ///
    /// `OAuth2` accounts get a token from the refresh guard first. If the
    /// server rejects it, the token is refreshed once and the open retried;
    /// a second rejection is a [`Error::ProtocolAuth`].
    ///
    /// # Errors
    ///
    /// - [`Error::ReauthRequired`] if no valid token can be obtained
    /// - [`Error::ProtocolAuth`] if the server keeps rejecting credentials
    /// - [`Error::Network`] if the server cannot be reached
    pub async fn open(&self, id: AccountId, protocol: Protocol) -> Result<O::Session> {
        let account = self.repo.load(id).await?;

        if !account.uses_oauth() {
            let credentials = password_credentials(&account, protocol);
            return self
                .opener
                .open(&account, protocol, &credentials)
                .await
                .map_err(|e| session_error(id, protocol, e));
        }

        let token = self.guard.ensure_valid(id).await?;
        let credentials = SessionCredentials::bearer(&account.email, token.access_token);
        debug!(
            account = id.0,
            protocol = %protocol,
            mechanism = credentials.mechanism_name(),
            "Opening session"
        );

        match self.opener.open(&account, protocol, &credentials).await {
            Ok(session) => Ok(session),
            Err(SessionError::Auth(message)) => {
                log_bearer_failure(id, protocol, &message);
                let token = self.guard.force_refresh(id).await?;
                let credentials = SessionCredentials::bearer(&account.email, token.access_token);
                info!(account = id.0, protocol = %protocol, "Retrying with refreshed token");
                self.opener
                    .open(&account, protocol, &credentials)
                    .await
                    .map_err(|e| session_error(id, protocol, e))
            }
            Err(e) => Err(session_error(id, protocol, e)),
        }
    }
}

fn password_credentials(account: &Account, protocol: Protocol) -> SessionCredentials {
    let (username, password) = match protocol {
        Protocol::Imap => (&account.imap.username, &account.imap.password),
        Protocol::Smtp => (&account.smtp.username, &account.smtp.password),
    };
    SessionCredentials::Password {
        username: username.trim().to_string(),
        password: password.clone(),
    }
}

fn session_error(id: AccountId, protocol: Protocol, error: SessionError) -> Error {
    match error {
        SessionError::Auth(message) => {
            warn!(account = id.0, protocol = %protocol, "Server rejected credentials: {message}");
            Error::ProtocolAuth {
                account: id,
                message,
            }
        }
        SessionError::Network(message) => Error::Network(message),
    }
}

fn log_bearer_failure(id: AccountId, protocol: Protocol, message: &str) {
    match BearerFailure::parse(message) {
        Some(failure) => warn!(
            account = id.0,
            protocol = %protocol,
            status = %failure.status,
            scope = failure.scope.as_deref().unwrap_or(""),
            names_scope = failure.names_scope(),
            "Server rejected bearer token"
        ),
        None => warn!(account = id.0, protocol = %protocol, "Server rejected bearer token: {message}"),
    }
}
