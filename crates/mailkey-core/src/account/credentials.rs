//! Secret storage for account passwords and `OAuth2` tokens.
//!
//! [`KeyringCredentials`] uses the platform's native credential storage:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager
//!
//! [`MemoryCredentials`] keeps secrets in process memory and can be told to
//! fail writes, which the repository tests use to check rollback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use keyring::Entry;
use mailkey_oauth::Token;
use tracing::{debug, warn};

use super::AccountId;

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "mailkey";

/// Kind of secret held for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// IMAP password.
    ImapPassword,
    /// SMTP password.
    SmtpPassword,
    /// Serialized `OAuth2` token.
    OAuthToken,
}

impl CredentialKind {
    /// Every kind, in deletion order.
    pub const ALL: [Self; 3] = [Self::ImapPassword, Self::SmtpPassword, Self::OAuthToken];

    const fn key_part(self) -> &'static str {
        match self {
            Self::ImapPassword => "imap",
            Self::SmtpPassword => "smtp",
            Self::OAuthToken => "oauth_token",
        }
    }
}

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// Stored token could not be encoded or decoded.
    #[error("Stored token is unreadable: {0}")]
    Token(#[from] serde_json::Error),

    /// Account ID is required for credential operations.
    #[error("Account ID is required for credential storage")]
    MissingAccountId,

    /// The store refused the write.
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Storage for per-account secrets.
///
/// Implementors provide raw get/set/delete; token and password helpers are
/// built on top. Deleting a missing entry is not an error.
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Stores a secret, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the write.
    fn set(&self, account: AccountId, kind: CredentialKind, secret: &str) -> CredentialResult<()>;

    /// Reads a secret; `None` when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get(&self, account: AccountId, kind: CredentialKind) -> CredentialResult<Option<String>>;

    /// Removes a secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store rejects the delete.
    fn delete(&self, account: AccountId, kind: CredentialKind) -> CredentialResult<()>;

    /// Stores an `OAuth2` token as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    fn store_token(&self, account: AccountId, token: &Token) -> CredentialResult<()> {
        let json = serde_json::to_string(token)?;
        self.set(account, CredentialKind::OAuthToken, &json)
    }

    /// Loads the `OAuth2` token for an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored JSON is corrupt.
    fn load_token(&self, account: AccountId) -> CredentialResult<Option<Token>> {
        self.get(account, CredentialKind::OAuthToken)?
            .map(|json| serde_json::from_str(&json).map_err(CredentialError::from))
            .transpose()
    }

    /// Stores both IMAP and SMTP passwords.
    ///
    /// # Errors
    ///
    /// Returns an error if the account has no ID or either write fails.
    fn store_passwords(
        &self,
        account: Option<AccountId>,
        imap_password: &str,
        smtp_password: &str,
    ) -> CredentialResult<()> {
        let id = account.ok_or(CredentialError::MissingAccountId)?;
        self.set(id, CredentialKind::ImapPassword, imap_password)?;
        self.set(id, CredentialKind::SmtpPassword, smtp_password)
    }

    /// Loads `(imap_password, smtp_password)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the account has no ID or a read fails.
    fn load_passwords(
        &self,
        account: Option<AccountId>,
    ) -> CredentialResult<(Option<String>, Option<String>)> {
        let id = account.ok_or(CredentialError::MissingAccountId)?;
        Ok((
            self.get(id, CredentialKind::ImapPassword)?,
            self.get(id, CredentialKind::SmtpPassword)?,
        ))
    }

    /// Removes every secret held for an account.
    ///
    /// # Errors
    ///
    /// Returns the first failure; later kinds are still attempted.
    fn delete_all(&self, account: AccountId) -> CredentialResult<()> {
        let mut first_error = None;
        for kind in CredentialKind::ALL {
            if let Err(e) = self.delete(account, kind) {
                warn!("Failed to delete {kind:?} for account {account}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Credentials held in the system keyring.
#[derive(Debug, Clone, Default)]
pub struct KeyringCredentials;

impl KeyringCredentials {
    /// Creates a keyring-backed store.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn entry(account: AccountId, kind: CredentialKind) -> CredentialResult<Entry> {
        let key = format!("{SERVICE_NAME}_{}_{}", kind.key_part(), account.0);
        Ok(Entry::new(SERVICE_NAME, &key)?)
    }
}

impl CredentialStore for KeyringCredentials {
    fn set(&self, account: AccountId, kind: CredentialKind, secret: &str) -> CredentialResult<()> {
        Self::entry(account, kind)?.set_password(secret)?;
        debug!("Stored {kind:?} for account {account}");
        Ok(())
    }

    fn get(&self, account: AccountId, kind: CredentialKind) -> CredentialResult<Option<String>> {
        match Self::entry(account, kind)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => {
                debug!("No {kind:?} found for account {account}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, account: AccountId, kind: CredentialKind) -> CredentialResult<()> {
        match Self::entry(account, kind)?.delete_credential() {
            Ok(()) => {
                debug!("Deleted {kind:?} for account {account}");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    secrets: Mutex<HashMap<(AccountId, CredentialKind), String>>,
    fail_writes: AtomicBool,
}

impl MemoryCredentials {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `set` calls fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of secrets currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryCredentials {
    fn set(&self, account: AccountId, kind: CredentialKind, secret: &str) -> CredentialResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CredentialError::Unavailable("writes disabled".into()));
        }
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((account, kind), secret.to_string());
        Ok(())
    }

    fn get(&self, account: AccountId, kind: CredentialKind) -> CredentialResult<Option<String>> {
        Ok(self
            .secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(account, kind))
            .cloned())
    }

    fn delete(&self, account: AccountId, kind: CredentialKind) -> CredentialResult<()> {
        self.secrets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(account, kind));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn token() -> Token {
        Token::new(
            "access",
            "Bearer",
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        )
        .with_refresh_token("refresh")
    }

    #[test]
    fn memory_token_roundtrip() {
        let store = MemoryCredentials::new();
        let id = AccountId::new(1);

        assert!(store.load_token(id).unwrap().is_none());
        store.store_token(id, &token()).unwrap();
        assert_eq!(store.load_token(id).unwrap(), Some(token()));
    }

    #[test]
    fn memory_passwords_need_account_id() {
        let store = MemoryCredentials::new();
        assert!(matches!(
            store.store_passwords(None, "a", "b"),
            Err(CredentialError::MissingAccountId)
        ));

        store
            .store_passwords(Some(AccountId::new(2)), "imap", "smtp")
            .unwrap();
        let (imap, smtp) = store.load_passwords(Some(AccountId::new(2))).unwrap();
        assert_eq!(imap.as_deref(), Some("imap"));
        assert_eq!(smtp.as_deref(), Some("smtp"));
    }

    #[test]
    fn delete_all_clears_only_that_account() {
        let store = MemoryCredentials::new();
        store.store_token(AccountId::new(1), &token()).unwrap();
        store
            .store_passwords(Some(AccountId::new(1)), "a", "b")
            .unwrap();
        store.store_token(AccountId::new(2), &token()).unwrap();

        store.delete_all(AccountId::new(1)).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.load_token(AccountId::new(2)).unwrap().is_some());
    }

    #[test]
    fn failing_writes() {
        let store = MemoryCredentials::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.store_token(AccountId::new(1), &token()),
            Err(CredentialError::Unavailable(_))
        ));
        assert!(store.is_empty());

        store.set_fail_writes(false);
        store.store_token(AccountId::new(1), &token()).unwrap();
        assert!(!store.is_empty());
    }

    #[test]
    fn corrupt_token_is_reported() {
        let store = MemoryCredentials::new();
        store
            .set(AccountId::new(1), CredentialKind::OAuthToken, "{not json")
            .unwrap();
        assert!(matches!(
            store.load_token(AccountId::new(1)),
            Err(CredentialError::Token(_))
        ));
    }

    #[test]
    #[ignore = "Interacts with system keyring"]
    fn keyring_roundtrip() {
        let store = KeyringCredentials::new();
        let id = AccountId::new(99_999);

        store.store_token(id, &token()).unwrap();
        assert_eq!(store.load_token(id).unwrap(), Some(token()));

        store.delete_all(id).unwrap();
        assert!(store.load_token(id).unwrap().is_none());
    }
}
