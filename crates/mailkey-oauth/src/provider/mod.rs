//! `OAuth2` provider configurations.

use crate::error::{Error, Result};
use url::Url;

/// Scope Gmail requires for IMAP and SMTP.
pub const GMAIL_MAIL_SCOPE: &str = "https://mail.google.com/";

/// `OAuth2` provider configuration.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Provider name (e.g., "Google").
    pub name: String,
    /// Authorization endpoint URL.
    pub auth_url: Url,
    /// Token endpoint URL.
    pub token_url: Url,
    /// Userinfo endpoint returning at least `email`.
    pub userinfo_url: Option<Url>,
    /// Token introspection endpoint, if the provider has one.
    pub tokeninfo_url: Option<Url>,
    /// Default scopes.
    pub default_scopes: Vec<String>,
    /// Scope a token must carry for IMAP/SMTP access.
    pub mail_scope: Option<String>,
}

impl Provider {
    /// Creates a new provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if URLs are invalid.
    pub fn new(
        name: impl Into<String>,
        auth_url: impl AsRef<str>,
        token_url: impl AsRef<str>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            auth_url: Url::parse(auth_url.as_ref())?,
            token_url: Url::parse(token_url.as_ref())?,
            userinfo_url: None,
            tokeninfo_url: None,
            default_scopes: Vec::new(),
            mail_scope: None,
        })
    }

    /// Sets the userinfo URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn with_userinfo_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.userinfo_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the tokeninfo URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn with_tokeninfo_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.tokeninfo_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the default scopes.
    #[must_use]
    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Sets the scope required for mail protocol access.
    #[must_use]
    pub fn with_mail_scope(mut self, scope: impl Into<String>) -> Self {
        self.mail_scope = Some(scope.into());
        self
    }

    /// Google `OAuth2` provider configuration.
    ///
    /// Requests full Gmail access plus the email/profile scopes the userinfo
    /// endpoint needs to return an address.
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn google() -> Result<Self> {
        Ok(Self::new(
            "Google",
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
        )?
        .with_userinfo_url("https://www.googleapis.com/oauth2/v2/userinfo")?
        .with_tokeninfo_url("https://www.googleapis.com/oauth2/v1/tokeninfo")?
        .with_default_scopes(vec![
            GMAIL_MAIL_SCOPE.to_string(),
            "https://www.googleapis.com/auth/userinfo.email".to_string(),
            "https://www.googleapis.com/auth/userinfo.profile".to_string(),
        ])
        .with_mail_scope(GMAIL_MAIL_SCOPE))
    }

    /// Microsoft/Outlook `OAuth2` provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn microsoft() -> Result<Self> {
        Ok(Self::new(
            "Microsoft",
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
            "https://login.microsoftonline.com/common/oauth2/v2.0/token",
        )?
        .with_userinfo_url("https://graph.microsoft.com/oidc/userinfo")?
        .with_default_scopes(vec![
            "https://outlook.office.com/IMAP.AccessAsUser.All".to_string(),
            "https://outlook.office.com/SMTP.Send".to_string(),
            "offline_access".to_string(),
            "openid".to_string(),
            "email".to_string(),
            "profile".to_string(),
        ])
        .with_mail_scope("https://outlook.office.com/IMAP.AccessAsUser.All"))
    }

    /// Yahoo `OAuth2` provider configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn yahoo() -> Result<Self> {
        Ok(Self::new(
            "Yahoo",
            "https://api.login.yahoo.com/oauth2/request_auth",
            "https://api.login.yahoo.com/oauth2/get_token",
        )?
        .with_userinfo_url("https://api.login.yahoo.com/openid/v1/userinfo")?
        .with_default_scopes(vec![
            "mail-w".to_string(),
            "mail-r".to_string(),
            "openid".to_string(),
            "email".to_string(),
        ])
        .with_mail_scope("mail-r"))
    }

    /// Returns the userinfo URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider has no userinfo endpoint.
    pub fn require_userinfo_url(&self) -> Result<&Url> {
        self.userinfo_url
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig(format!("{} has no userinfo endpoint", self.name)))
    }

    /// Validates that required URLs are set.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.auth_url.as_str().is_empty() {
            return Err(Error::InvalidConfig("auth_url is empty".into()));
        }
        if self.token_url.as_str().is_empty() {
            return Err(Error::InvalidConfig("token_url is empty".into()));
        }
        self.require_userinfo_url()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_google_provider() {
        let provider = Provider::google().unwrap();
        assert_eq!(provider.name, "Google");
        assert!(provider.tokeninfo_url.is_some());
        assert!(
            provider
                .default_scopes
                .iter()
                .any(|s| s == GMAIL_MAIL_SCOPE)
        );
        assert_eq!(provider.mail_scope.as_deref(), Some(GMAIL_MAIL_SCOPE));
        provider.validate().unwrap();
    }

    #[test]
    fn test_microsoft_provider() {
        let provider = Provider::microsoft().unwrap();
        assert_eq!(provider.name, "Microsoft");
        assert!(provider.default_scopes.iter().any(|s| s == "offline_access"));
        assert!(provider.tokeninfo_url.is_none());
        provider.validate().unwrap();
    }

    #[test]
    fn test_yahoo_provider() {
        let provider = Provider::yahoo().unwrap();
        assert_eq!(provider.name, "Yahoo");
        provider.validate().unwrap();
    }

    #[test]
    fn test_custom_provider_needs_userinfo() {
        let provider = Provider::new(
            "Custom",
            "https://auth.example.com/authorize",
            "https://auth.example.com/token",
        )
        .unwrap()
        .with_default_scopes(vec!["email".to_string()]);

        assert!(matches!(provider.validate(), Err(Error::InvalidConfig(_))));

        let provider = provider
            .with_userinfo_url("https://auth.example.com/userinfo")
            .unwrap();
        provider.validate().unwrap();
    }
}
