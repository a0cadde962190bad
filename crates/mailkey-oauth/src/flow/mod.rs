//! `OAuth2` exchange client and authorization flow.

mod code;
mod pkce;

pub use code::AuthorizationCodeFlow;
pub use pkce::PkceChallenge;

use std::sync::Arc;

use reqwest::{Client, Response};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::identity::{Identity, UserInfo};
use crate::provider::Provider;
use crate::token::{ErrorResponse, Token, TokenInfo, TokenResponse};

/// Longest error body kept in [`Error::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Client for a provider's token, userinfo and tokeninfo endpoints.
///
/// Performs network calls only; nothing is persisted here.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Client secret (optional for public clients).
    pub client_secret: Option<String>,
    /// Redirect URI for authorization code flow.
    pub redirect_uri: Option<String>,
    /// Provider configuration.
    pub provider: Provider,
    http_client: Client,
    clock: Arc<dyn Clock>,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: None,
            provider,
            http_client: Client::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the redirect URI.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Replaces the time source used to stamp token expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the code or the request fails.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<Token> {
        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
        ];

        if let Some(uri) = redirect_uri.or(self.redirect_uri.as_deref()) {
            params.push(("redirect_uri", uri));
        }
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        debug!(provider = %self.provider.name, pkce = code_verifier.is_some(), "Exchanging authorization code");
        let token = self.request_token(&params).await?;
        info!(
            provider = %self.provider.name,
            expires_at = %token.expires_at,
            scope_count = token.scopes.len(),
            has_refresh_token = token.refresh_token.is_some(),
            "Authorization code exchanged"
        );
        Ok(token)
    }

    /// Refreshes an access token using its refresh token.
    ///
    /// The previous refresh token is kept when the provider does not rotate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the token has no refresh token or the provider
    /// rejects it (`invalid_grant` for revoked/expired refresh tokens).
    pub async fn refresh_token(&self, token: &Token) -> Result<Token> {
        let refresh_token = token.refresh_token()?;

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let mut new_token = self.request_token(&params).await?;

        if new_token.refresh_token.is_none() {
            new_token.refresh_token.clone_from(&token.refresh_token);
        }
        // Some providers omit `scope` on refresh; the grant is unchanged.
        if new_token.scopes.is_empty() {
            new_token.scopes.clone_from(&token.scopes);
        }

        debug!(
            provider = %self.provider.name,
            expires_at = %new_token.expires_at,
            "Access token refreshed"
        );
        Ok(new_token)
    }

    /// Fetches the identity the token was issued for.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the endpoint answers with a
    /// non-success status, or the body has no email.
    pub async fn fetch_identity(&self, token: &Token) -> Result<Identity> {
        let url = self.provider.require_userinfo_url()?.clone();

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = error_from_response(response).await;
            warn!(provider = %self.provider.name, error = %err, "Userinfo request failed");
            return Err(err);
        }

        let info: UserInfo = response.json().await?;
        let identity = Identity::from_userinfo(info)?;
        debug!(
            provider = %self.provider.name,
            email = %identity.email,
            has_name = identity.display_name.is_some(),
            "Fetched identity"
        );
        Ok(identity)
    }

    /// Asks the provider which scopes, audience and lifetime a token has.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider has no tokeninfo endpoint or the
    /// request fails.
    pub async fn token_info(&self, token: &Token) -> Result<TokenInfo> {
        let url = self.provider.tokeninfo_url.clone().ok_or_else(|| {
            Error::InvalidConfig(format!("{} has no tokeninfo endpoint", self.provider.name))
        })?;

        let response = self
            .http_client
            .get(url)
            .query(&[("access_token", token.access_token.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(response.json().await?)
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<Token> {
        let response = self
            .http_client
            .post(self.provider.token_url.clone())
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let token_response: TokenResponse = response.json().await?;
        Token::from_response(token_response, self.clock.now())
    }
}

/// Maps a non-success response to an error. 4xx bodies in the `OAuth2`
/// `{error, error_description}` shape become [`Error::OAuth`].
async fn error_from_response(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status.is_client_error()
        && let Ok(parsed) = serde_json::from_str::<ErrorResponse>(&body)
    {
        return parsed.into_error();
    }

    Error::Status {
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    }
}
