//! Token refresh guard.
//!
//! Every protocol session asks the guard for a usable token first. Refreshes
//! for one account are serialized through a per-account async mutex; other
//! accounts refresh independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use mailkey_oauth::{Clock, SystemClock, Token};
use tracing::{debug, info, warn};

use crate::account::{Account, AccountId, AccountRepository};
use crate::backend::AuthBackend;
use crate::config::RefreshPolicy;
use crate::{Error, Result};

/// Freshness of a stored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Usable as-is.
    Valid,
    /// Still usable but inside the early-refresh window.
    NearingExpiry,
    /// Past its expiry; must be refreshed.
    Expired,
}

impl TokenState {
    /// Classifies `token` at `now` with the given early-refresh window.
    #[must_use]
    pub fn classify(token: &Token, now: DateTime<Utc>, threshold: TimeDelta) -> Self {
        if token.is_expired_at(now) {
            Self::Expired
        } else if token.expires_within(now, threshold) {
            Self::NearingExpiry
        } else {
            Self::Valid
        }
    }
}

/// Why a refresh attempt did not produce a token.
enum RefreshFailure {
    /// The provider refused; retrying will not help.
    Rejected(String),
    /// Transient errors outlasted the retry budget.
    Exhausted(mailkey_oauth::Error),
}

impl RefreshFailure {
    fn reason(&self) -> String {
        match self {
            Self::Rejected(reason) => reason.clone(),
            Self::Exhausted(e) => format!("refresh kept failing: {e}"),
        }
    }
}

/// Hands out valid tokens, refreshing them when needed.
#[derive(Debug)]
pub struct RefreshGuard<B> {
    repo: AccountRepository,
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
    locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<B: AuthBackend> RefreshGuard<B> {
    /// Creates a guard over the given repository and backend.
    #[must_use]
    pub fn new(repo: AccountRepository, backend: Arc<B>, policy: RefreshPolicy) -> Self {
        Self {
            repo,
            backend,
            clock: Arc::new(SystemClock),
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The repository this guard reads and writes.
    #[must_use]
    pub const fn repository(&self) -> &AccountRepository {
        &self.repo
    }

    /// Hands out the account's lock, dropping idle locks of other accounts.
    fn lock_for(&self, id: AccountId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the arena holds an idle lock; nobody can be waiting on it.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(id).or_default())
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.len()
    }

    /// Returns a token that is valid now, refreshing it if necessary.
    ///
    /// A token inside the early-refresh window is refreshed; if that refresh
    /// fails transiently the still-valid token is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::AccountNotFound`] for unknown accounts
    /// - [`Error::Config`] for password accounts
    /// - [`Error::ReauthRequired`] when the token cannot be renewed; the
    ///   account is flagged but kept
    pub async fn ensure_valid(&self, id: AccountId) -> Result<Token> {
        let lock = self.lock_for(id);
        let _held = lock.lock().await;

        // Read under the lock: a refresh or a re-auth flag may have just
        // been written by the previous holder.
        let account = self.oauth_account(id).await?;
        let token = self.stored_token(&account).await?;
        let now = self.clock.now();

        match TokenState::classify(&token, now, self.policy.threshold()) {
            TokenState::Valid => {
                debug!(
                    account = id.0,
                    remaining_secs = token.remaining(now).num_seconds(),
                    "Token valid"
                );
                Ok(token)
            }
            TokenState::NearingExpiry => {
                warn!(
                    account = id.0,
                    remaining_secs = token.remaining(now).num_seconds(),
                    "Token close to expiry, refreshing"
                );
                match self.refresh_with_retries(&account, &token).await {
                    Ok(fresh) => self.store_refreshed(&account, fresh).await,
                    Err(RefreshFailure::Exhausted(e)) => {
                        warn!(
                            account = id.0,
                            "Refresh failed, using the still-valid token: {e}"
                        );
                        Ok(token)
                    }
                    Err(failure) => Err(self.flag_reauth(id, failure.reason()).await),
                }
            }
            TokenState::Expired => {
                info!(
                    account = id.0,
                    expired_secs = -token.remaining(now).num_seconds(),
                    "Token expired, refreshing"
                );
                match self.refresh_with_retries(&account, &token).await {
                    Ok(fresh) => self.store_refreshed(&account, fresh).await,
                    Err(failure) => Err(self.flag_reauth(id, failure.reason()).await),
                }
            }
        }
    }

    /// Refreshes the token regardless of its expiry.
    ///
    /// Used after a mail server rejected a token the guard considered valid.
    ///
    /// # Errors
    ///
    /// Same as [`Self::ensure_valid`], except that no stale token is ever
    /// returned.
    pub async fn force_refresh(&self, id: AccountId) -> Result<Token> {
        let lock = self.lock_for(id);
        let _held = lock.lock().await;

        let account = self.oauth_account(id).await?;
        let token = self.stored_token(&account).await?;
        info!(account = id.0, "Forcing token refresh");
        match self.refresh_with_retries(&account, &token).await {
            Ok(fresh) => self.store_refreshed(&account, fresh).await,
            Err(failure) => Err(self.flag_reauth(id, failure.reason()).await),
        }
    }

    async fn oauth_account(&self, id: AccountId) -> Result<Account> {
        let account = self.repo.load(id).await?;
        if !account.uses_oauth() {
            return Err(Error::Config(format!(
                "account {id} signs in with a password, not OAuth2"
            )));
        }
        Ok(account)
    }

    async fn stored_token(&self, account: &Account) -> Result<Token> {
        let id = account_id(account)?;
        match self.repo.load_token(id)? {
            Some(token) => Ok(token),
            None => Err(self.flag_reauth(id, "no stored token".to_string()).await),
        }
    }

    async fn refresh_with_retries(
        &self,
        account: &Account,
        token: &Token,
    ) -> std::result::Result<Token, RefreshFailure> {
        if token.refresh_token.is_none() {
            return Err(RefreshFailure::Rejected("no refresh token stored".into()));
        }

        let mut attempt = 0;
        loop {
            match self.backend.refresh(account.provider, token).await {
                Ok(fresh) => return Ok(fresh),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        email = %account.email,
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transient refresh failure, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => return Err(RefreshFailure::Exhausted(e)),
                Err(e) if e.is_invalid_grant() => {
                    return Err(RefreshFailure::Rejected(format!(
                        "refresh token was rejected: {e}"
                    )));
                }
                Err(e) => return Err(RefreshFailure::Rejected(e.to_string())),
            }
        }
    }

    async fn store_refreshed(&self, account: &Account, fresh: Token) -> Result<Token> {
        let id = account_id(account)?;
        self.repo.update_token(id, &fresh).await?;
        if account.needs_reauth {
            self.repo.set_needs_reauth(id, false).await?;
        }
        let now = self.clock.now();
        info!(
            account = id.0,
            expires_in_secs = fresh.remaining(now).num_seconds(),
            expires_at = %fresh.expires_at,
            "Token refreshed"
        );
        Ok(fresh)
    }

    /// Flags the account and builds the error to return. The account is kept.
    async fn flag_reauth(&self, id: AccountId, reason: String) -> Error {
        warn!(account = id.0, reason = %reason, "Account needs re-authentication");
        if let Err(e) = self.repo.set_needs_reauth(id, true).await {
            warn!(account = id.0, "Failed to flag account for re-authentication: {e}");
        }
        Error::ReauthRequired {
            account: id,
            reason,
        }
    }
}

fn account_id(account: &Account) -> Result<AccountId> {
    account
        .id
        .ok_or_else(|| Error::Config("account has not been saved".into()))
}
