//! Completing an `OAuth2` sign-in: exchange, identity, provisioning.
//!
//! The steps run strictly in order. Each failure is reported as the error
//! of the step it happened in, and nothing is stored unless every step
//! succeeded.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mailkey_oauth::Token;
use tracing::{debug, info, warn};

use crate::account::{AccountId, AuthType, ProviderKind};
use crate::backend::AuthBackend;
use crate::provision::Provisioner;
use crate::{Error, Result};

/// Cancels a sign-in between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation. A step already running still finishes.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One sign-in attempt for a provider.
#[derive(Debug)]
pub struct SignIn<B> {
    backend: Arc<B>,
    provisioner: Provisioner,
    provider: ProviderKind,
    requested_scopes: Vec<String>,
    mail_scope: Option<String>,
    cancel: CancelHandle,
}

impl<B: AuthBackend + 'static> SignIn<B> {
    /// Starts a sign-in for `provider`, requesting its default scopes.
    #[must_use]
    pub fn new(backend: Arc<B>, provisioner: Provisioner, provider: ProviderKind) -> Self {
        let endpoints = provider.oauth_provider().ok().flatten();
        Self {
            backend,
            provisioner,
            provider,
            requested_scopes: endpoints
                .as_ref()
                .map(|p| p.default_scopes.clone())
                .unwrap_or_default(),
            mail_scope: endpoints.and_then(|p| p.mail_scope),
            cancel: CancelHandle::default(),
        }
    }

    /// Overrides the scopes the consent URL asked for.
    #[must_use]
    pub fn with_requested_scopes(mut self, scopes: Vec<String>) -> Self {
        self.requested_scopes = scopes;
        self
    }

    /// Handle for cancelling this attempt from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Exchanges the authorization code, verifies the identity and stores
    /// the account.
    ///
    /// The exchange runs as its own task, so it completes even if this
    /// future is dropped; cancellation is checked between steps.
    ///
    /// # Errors
    ///
    /// - [`Error::Exchange`] if the code exchange fails
    /// - [`Error::Identity`] if the identity lookup fails; no account is created
    /// - [`Error::Validation`] if the identity has no email
    /// - [`Error::Cancelled`] if cancelled between steps
    pub async fn complete(&self, code: &str, code_verifier: Option<&str>) -> Result<AccountId> {
        self.check_cancelled("exchange")?;

        let backend = Arc::clone(&self.backend);
        let provider = self.provider;
        let code = code.to_string();
        let verifier = code_verifier.map(str::to_string);
        let exchange = tokio::spawn(async move {
            backend
                .exchange(provider, &code, verifier.as_deref())
                .await
        });
        let token = exchange.await?.map_err(|e| {
            warn!(provider = provider.as_str(), "Code exchange failed: {e}");
            Error::Exchange(e)
        })?;
        self.log_scope_grant(&token);

        self.check_cancelled("identity")?;
        let identity = self
            .backend
            .fetch_identity(provider, &token)
            .await
            .map_err(|e| {
                warn!(provider = provider.as_str(), "Identity lookup failed: {e}");
                Error::Identity(e)
            })?;
        info!(
            provider = provider.as_str(),
            email = %identity.email,
            has_name = identity.display_name.is_some(),
            "Identity verified"
        );

        self.check_cancelled("provisioning")?;
        self.provisioner
            .provision(token, identity, provider, AuthType::OAuth2)
            .await
    }

    fn check_cancelled(&self, next_step: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!(provider = self.provider.as_str(), next_step, "Sign-in cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn log_scope_grant(&self, token: &Token) {
        let requested: BTreeSet<&str> = self.requested_scopes.iter().map(String::as_str).collect();
        let missing: Vec<&str> = requested
            .iter()
            .copied()
            .filter(|scope| !token.has_scope(scope))
            .collect();

        info!(
            provider = self.provider.as_str(),
            requested = requested.len(),
            granted = token.scopes.len(),
            missing = missing.len(),
            "Scope grant"
        );
        if !missing.is_empty() {
            debug!(provider = self.provider.as_str(), ?missing, "Requested scopes not granted");
        }
        if let Some(mail_scope) = &self.mail_scope
            && !token.scopes.is_empty()
            && !token.has_scope(mail_scope)
        {
            warn!(
                provider = self.provider.as_str(),
                mail_scope = %mail_scope,
                "Token lacks the mail scope; IMAP and SMTP will reject it"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::{TimeDelta, Utc};
    use mailkey_oauth::Identity;

    use super::*;
    use crate::account::{AccountRepository, MemoryCredentials};

    #[derive(Debug, Default)]
    struct FakeBackend {
        exchange_fails: bool,
        identity_fails: bool,
        exchanges: AtomicUsize,
    }

    impl AuthBackend for FakeBackend {
        async fn exchange(
            &self,
            _provider: ProviderKind,
            code: &str,
            code_verifier: Option<&str>,
        ) -> mailkey_oauth::Result<Token> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            assert_eq!(code, "the-code");
            assert_eq!(code_verifier, Some("verifier"));
            if self.exchange_fails {
                return Err(mailkey_oauth::Error::oauth_error("invalid_grant", "Bad code"));
            }
            Ok(
                Token::new("access", "Bearer", Utc::now() + TimeDelta::hours(1))
                    .with_refresh_token("refresh")
                    .with_scopes(["https://mail.google.com/", "email"]),
            )
        }

        async fn fetch_identity(
            &self,
            _provider: ProviderKind,
            _token: &Token,
        ) -> mailkey_oauth::Result<Identity> {
            if self.identity_fails {
                return Err(mailkey_oauth::Error::Status {
                    status: 500,
                    body: "backend error".into(),
                });
            }
            Ok(Identity {
                email: "user@gmail.com".into(),
                display_name: None,
                picture: None,
            })
        }

        async fn refresh(
            &self,
            _provider: ProviderKind,
            _token: &Token,
        ) -> mailkey_oauth::Result<Token> {
            unreachable!()
        }
    }

    async fn sign_in(backend: FakeBackend) -> (SignIn<FakeBackend>, AccountRepository) {
        let repo = AccountRepository::in_memory(Arc::new(MemoryCredentials::new()))
            .await
            .unwrap();
        let sign_in = SignIn::new(
            Arc::new(backend),
            Provisioner::new(repo.clone()),
            ProviderKind::Gmail,
        );
        (sign_in, repo)
    }

    #[tokio::test]
    async fn complete_provisions_account() {
        let (sign_in, repo) = sign_in(FakeBackend::default()).await;

        let id = sign_in.complete("the-code", Some("verifier")).await.unwrap();

        let account = repo.load(id).await.unwrap();
        assert_eq!(account.email, "user@gmail.com");
        assert_eq!(account.provider, ProviderKind::Gmail);
        assert!(repo.load_token(id).unwrap().is_some());
    }

    #[tokio::test]
    async fn exchange_failure_names_the_step() {
        let (sign_in, repo) = sign_in(FakeBackend {
            exchange_fails: true,
            ..FakeBackend::default()
        })
        .await;

        let err = sign_in
            .complete("the-code", Some("verifier"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Exchange(_)));
        assert!(err.to_string().contains("exchanging the authorization code"));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn identity_failure_creates_no_account() {
        let (sign_in, repo) = sign_in(FakeBackend {
            identity_fails: true,
            ..FakeBackend::default()
        })
        .await;

        let err = sign_in
            .complete("the-code", Some("verifier"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Identity(_)));
        assert!(err.to_string().contains("fetching the account identity"));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_skips_exchange() {
        let backend = Arc::new(FakeBackend::default());
        let repo = AccountRepository::in_memory(Arc::new(MemoryCredentials::new()))
            .await
            .unwrap();
        let sign_in = SignIn::new(
            Arc::clone(&backend),
            Provisioner::new(repo.clone()),
            ProviderKind::Gmail,
        );
        sign_in.cancel_handle().cancel();

        let err = sign_in.complete("the-code", Some("verifier")).await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(backend.exchanges.load(Ordering::SeqCst), 0);
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[test]
    fn cancel_handle_is_shared() {
        let handle = CancelHandle::default();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
    }
}
