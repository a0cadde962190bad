//! Turning a verified sign-in into a stored account.

use mailkey_oauth::{Identity, Token};
use tracing::{info, warn};

use crate::account::{
    Account, AccountId, AccountRepository, AuthType, ProviderKind, ValidationError,
    validate_account,
};
use crate::{Error, Result};

/// Creates or re-authenticates accounts.
#[derive(Debug, Clone)]
pub struct Provisioner {
    repo: AccountRepository,
}

impl Provisioner {
    /// Creates a provisioner writing to `repo`.
    #[must_use]
    pub const fn new(repo: AccountRepository) -> Self {
        Self { repo }
    }

    /// The repository accounts are written to.
    #[must_use]
    pub const fn repository(&self) -> &AccountRepository {
        &self.repo
    }

    /// Stores the account for a verified identity together with its token.
    ///
    /// An existing account with the same email is re-authenticated: it
    /// moves to `provider` and its servers, its token is replaced, any
    /// stored passwords are dropped, its `needs_reauth` flag is cleared, and
    /// its ID is returned. Either way the account becomes the selected one.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] with [`ValidationError::EmptyEmail`] if the
    ///   identity has no email; nothing is written
    /// - database or credential errors; nothing is written
    pub async fn provision(
        &self,
        token: Token,
        identity: Identity,
        provider: ProviderKind,
        auth_type: AuthType,
    ) -> Result<AccountId> {
        let email = identity.email.trim();
        if email.is_empty() {
            warn!(provider = provider.as_str(), "Refusing to provision an account without email");
            return Err(Error::Validation(ValidationError::EmptyEmail));
        }

        let (mut account, reauth) = match self.repo.find_by_email(email).await? {
            Some(mut existing) => {
                if existing.provider != provider {
                    info!(
                        account = existing.id.map(|id| id.0),
                        from = existing.provider.as_str(),
                        to = provider.as_str(),
                        "Re-authentication switches provider"
                    );
                }
                existing.apply_provider(provider);
                existing.needs_reauth = false;
                existing.auth_type = auth_type;
                if existing.uses_oauth() {
                    existing.imap.password.clear();
                    existing.smtp.password.clear();
                }
                (existing, true)
            }
            None => (Account::from_identity(&identity, provider, auth_type), false),
        };

        let id = self.repo.save_with_token(&mut account, &token).await?;
        self.select(id).await;

        info!(
            account = id.0,
            email = %account.email,
            provider = account.provider.as_str(),
            reauth,
            scope_count = token.scopes.len(),
            expires_at = %token.expires_at,
            "Account provisioned"
        );
        Ok(id)
    }

    /// Stores a password account after validating every field.
    ///
    /// An existing account with the same email is updated in place.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAccount`] listing every validation problem
    /// - database or credential errors
    pub async fn provision_password(&self, mut account: Account) -> Result<AccountId> {
        account.auth_type = AuthType::Password;
        account.email = account.email.trim().to_string();
        validate_account(&account).map_err(Error::InvalidAccount)?;

        if account.id.is_none()
            && let Some(existing) = self.repo.find_by_email(&account.email).await?
        {
            account.id = existing.id;
        }

        let id = self.repo.save(&mut account).await?;
        self.select(id).await;

        info!(
            account = id.0,
            email = %account.email,
            imap_host = %account.imap.host,
            smtp_host = %account.smtp.host,
            "Password account provisioned"
        );
        Ok(id)
    }

    /// Selection is a convenience; failing to record it does not undo the
    /// account.
    async fn select(&self, id: AccountId) {
        if let Err(e) = self.repo.set_selected(id).await {
            warn!(account = id.0, "Failed to record selected account: {e}");
        }
    }
}
