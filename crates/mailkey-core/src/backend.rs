//! Network side of sign-in and refresh.
//!
//! [`AuthBackend`] is the seam between the account services and the
//! provider endpoints. [`ProviderClients`] implements it with one
//! [`OAuthClient`] per configured provider.

use std::collections::HashMap;
use std::future::Future;

use mailkey_oauth::{Identity, OAuthClient, Token, TokenInfo};

use crate::account::ProviderKind;
use crate::config::Config;

/// Token endpoint and identity calls, per provider.
pub trait AuthBackend: Send + Sync {
    /// Exchanges an authorization code for a token.
    fn exchange(
        &self,
        provider: ProviderKind,
        code: &str,
        code_verifier: Option<&str>,
    ) -> impl Future<Output = mailkey_oauth::Result<Token>> + Send;

    /// Looks up the identity the token was issued for.
    fn fetch_identity(
        &self,
        provider: ProviderKind,
        token: &Token,
    ) -> impl Future<Output = mailkey_oauth::Result<Identity>> + Send;

    /// Renews a token with its refresh token.
    fn refresh(
        &self,
        provider: ProviderKind,
        token: &Token,
    ) -> impl Future<Output = mailkey_oauth::Result<Token>> + Send;
}

/// Configured exchange clients keyed by provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderClients {
    clients: HashMap<ProviderKind, OAuthClient>,
}

impl ProviderClients {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a client for every provider with a configured client ID.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let clients = ProviderKind::ALL
            .into_iter()
            .filter(|kind| config.oauth_app(*kind).is_some())
            .filter_map(|kind| match config.oauth_client(kind) {
                Ok(client) => Some((kind, client)),
                Err(e) => {
                    tracing::warn!(provider = kind.as_str(), "Skipping provider: {e}");
                    None
                }
            })
            .collect();
        Self { clients }
    }

    /// Adds or replaces the client for a provider.
    #[must_use]
    pub fn with_client(mut self, provider: ProviderKind, client: OAuthClient) -> Self {
        self.clients.insert(provider, client);
        self
    }

    /// The client for a provider, if configured.
    #[must_use]
    pub fn get(&self, provider: ProviderKind) -> Option<&OAuthClient> {
        self.clients.get(&provider)
    }

    /// The client for a provider.
    ///
    /// # Errors
    ///
    /// Returns [`mailkey_oauth::Error::InvalidConfig`] if none is configured.
    pub fn client(&self, provider: ProviderKind) -> mailkey_oauth::Result<&OAuthClient> {
        self.get(provider).ok_or_else(|| {
            mailkey_oauth::Error::InvalidConfig(format!("no OAuth2 client configured for {provider}"))
        })
    }

    /// Introspects a token with the provider's tokeninfo endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is not configured or the call fails.
    pub async fn token_info(
        &self,
        provider: ProviderKind,
        token: &Token,
    ) -> mailkey_oauth::Result<TokenInfo> {
        self.client(provider)?.token_info(token).await
    }
}

impl AuthBackend for ProviderClients {
    async fn exchange(
        &self,
        provider: ProviderKind,
        code: &str,
        code_verifier: Option<&str>,
    ) -> mailkey_oauth::Result<Token> {
        self.client(provider)?
            .exchange_code(code, None, code_verifier)
            .await
    }

    async fn fetch_identity(
        &self,
        provider: ProviderKind,
        token: &Token,
    ) -> mailkey_oauth::Result<Identity> {
        self.client(provider)?.fetch_identity(token).await
    }

    async fn refresh(&self, provider: ProviderKind, token: &Token) -> mailkey_oauth::Result<Token> {
        self.client(provider)?.refresh_token(token).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mailkey_oauth::Provider;

    use super::*;

    #[test]
    fn from_config_only_includes_configured_providers() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "GMAIL_CLIENT_ID").then(|| "id".to_string()));

        let clients = ProviderClients::from_config(&config);

        assert_eq!(clients.get(ProviderKind::Gmail).unwrap().client_id, "id");
        assert!(clients.get(ProviderKind::Outlook).is_none());
        assert!(matches!(
            clients.client(ProviderKind::Yahoo),
            Err(mailkey_oauth::Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn unconfigured_provider_fails_without_network() {
        let clients = ProviderClients::new()
            .with_client(ProviderKind::Gmail, OAuthClient::new("id", Provider::google().unwrap()));

        let result = clients.exchange(ProviderKind::Outlook, "code", None).await;

        assert!(matches!(result, Err(mailkey_oauth::Error::InvalidConfig(_))));
    }
}
