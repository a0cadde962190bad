//! Account model types.

use mailkey_oauth::{Identity, Provider};
use serde::{Deserialize, Serialize};

/// Unique identifier for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl AccountId {
    /// Create a new account ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Security/encryption mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Security {
    /// No encryption (not recommended).
    None,
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None (insecure)",
            Self::Tls => "SSL/TLS",
            Self::StartTls => "STARTTLS",
        }
    }

    /// Storage key.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tls => "tls",
            Self::StartTls => "starttls",
        }
    }

    /// Parses a storage key; unknown values fall back to TLS.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "none" => Self::None,
            "starttls" => Self::StartTls,
            _ => Self::Tls,
        }
    }
}

/// How the account authenticates to its mail servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthType {
    /// Username/password (app password for Gmail/Yahoo).
    #[default]
    Password,
    /// `OAuth2` bearer token.
    OAuth2,
}

impl AuthType {
    /// Storage key.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::OAuth2 => "oauth2",
        }
    }

    /// Parses a storage key; unknown values mean password auth.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s == "oauth2" {
            Self::OAuth2
        } else {
            Self::Password
        }
    }
}

/// Mail provider the account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Gmail / Google Workspace.
    Gmail,
    /// Outlook / Microsoft 365.
    Outlook,
    /// Yahoo Mail.
    Yahoo,
    /// iCloud Mail.
    ICloud,
    /// Any other IMAP/SMTP server.
    #[default]
    Custom,
}

struct ServerPreset {
    imap_host: &'static str,
    imap_port: u16,
    imap_security: Security,
    smtp_host: &'static str,
    smtp_port: u16,
    smtp_security: Security,
}

impl ProviderKind {
    /// All variants, for pickers and parsing.
    pub const ALL: [Self; 5] = [
        Self::Gmail,
        Self::Outlook,
        Self::Yahoo,
        Self::ICloud,
        Self::Custom,
    ];

    /// Storage key.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Yahoo => "yahoo",
            Self::ICloud => "icloud",
            Self::Custom => "custom",
        }
    }

    /// Parses a storage key; unknown values are custom servers.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .unwrap_or(Self::Custom)
    }

    /// Human-readable provider name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Gmail => "Gmail",
            Self::Outlook => "Outlook",
            Self::Yahoo => "Yahoo",
            Self::ICloud => "iCloud",
            Self::Custom => "Custom IMAP/SMTP",
        }
    }

    /// Detects the provider from an email domain.
    #[must_use]
    pub fn from_email(email: &str) -> Self {
        let Some(domain) = email.trim().rsplit_once('@').map(|(_, d)| d.to_lowercase()) else {
            return Self::Custom;
        };
        match domain.as_str() {
            "gmail.com" | "googlemail.com" => Self::Gmail,
            "outlook.com" | "hotmail.com" | "live.com" => Self::Outlook,
            "yahoo.com" | "ymail.com" => Self::Yahoo,
            "icloud.com" | "me.com" | "mac.com" => Self::ICloud,
            _ => Self::Custom,
        }
    }

    /// Returns true when sign-in can go through `OAuth2`.
    #[must_use]
    pub const fn supports_oauth(&self) -> bool {
        matches!(self, Self::Gmail | Self::Outlook | Self::Yahoo)
    }

    /// `OAuth2` endpoints for this provider, if it supports `OAuth2`.
    ///
    /// # Errors
    ///
    /// Returns an error if the preset URLs fail to parse.
    pub fn oauth_provider(&self) -> mailkey_oauth::Result<Option<Provider>> {
        match self {
            Self::Gmail => Provider::google().map(Some),
            Self::Outlook => Provider::microsoft().map(Some),
            Self::Yahoo => Provider::yahoo().map(Some),
            Self::ICloud | Self::Custom => Ok(None),
        }
    }

    const fn preset(self) -> Option<ServerPreset> {
        match self {
            Self::Gmail => Some(ServerPreset {
                imap_host: "imap.gmail.com",
                imap_port: 993,
                imap_security: Security::Tls,
                smtp_host: "smtp.gmail.com",
                smtp_port: 465,
                smtp_security: Security::Tls,
            }),
            Self::Outlook => Some(ServerPreset {
                imap_host: "outlook.office365.com",
                imap_port: 993,
                imap_security: Security::Tls,
                smtp_host: "smtp.office365.com",
                smtp_port: 587,
                smtp_security: Security::StartTls,
            }),
            Self::Yahoo => Some(ServerPreset {
                imap_host: "imap.mail.yahoo.com",
                imap_port: 993,
                imap_security: Security::Tls,
                smtp_host: "smtp.mail.yahoo.com",
                smtp_port: 465,
                smtp_security: Security::Tls,
            }),
            Self::ICloud => Some(ServerPreset {
                imap_host: "imap.mail.me.com",
                imap_port: 993,
                imap_security: Security::Tls,
                smtp_host: "smtp.mail.me.com",
                smtp_port: 587,
                smtp_security: Security::StartTls,
            }),
            Self::Custom => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// IMAP server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImapConfig {
    /// Server hostname.
    pub host: String,
    /// Server port (default: 993 for TLS, 143 for STARTTLS).
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Username for authentication.
    pub username: String,
    /// Password; kept in the credential store, empty for `OAuth2` accounts.
    #[serde(skip)]
    pub password: String,
}

impl ImapConfig {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::None | Security::StartTls => 143,
            Security::Tls => 993,
        }
    }
}

/// SMTP server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Server hostname.
    pub host: String,
    /// Server port (default: 465 for TLS, 587 for STARTTLS).
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Username for authentication.
    pub username: String,
    /// Password; kept in the credential store, empty for `OAuth2` accounts.
    #[serde(skip)]
    pub password: String,
}

impl SmtpConfig {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(security: Security) -> u16 {
        match security {
            Security::None => 25,
            Security::StartTls => 587,
            Security::Tls => 465,
        }
    }
}

/// Email account configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier (None for unsaved accounts).
    pub id: Option<AccountId>,
    /// Name shown in the account list.
    pub display_name: String,
    /// Email address.
    pub email: String,
    /// Mail provider.
    pub provider: ProviderKind,
    /// Authentication method.
    pub auth_type: AuthType,
    /// IMAP configuration.
    pub imap: ImapConfig,
    /// SMTP configuration.
    pub smtp: SmtpConfig,
    /// Whether this is the default account.
    pub is_default: bool,
    /// Set when the stored token can no longer be refreshed.
    pub needs_reauth: bool,
}

impl Account {
    /// Create a new empty account.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create account with server defaults detected from the email domain.
    #[must_use]
    pub fn with_email(email: &str) -> Self {
        let email = email.trim();
        let mut account = Self {
            email: email.to_string(),
            display_name: local_part(email).to_string(),
            ..Default::default()
        };
        account.apply_provider(ProviderKind::from_email(email));

        account.imap.username = email.to_string();
        account.smtp.username = email.to_string();
        account
    }

    /// Create an `OAuth2` account for a verified identity.
    ///
    /// The requested provider wins over domain detection, so hosted domains
    /// (Google Workspace, Microsoft 365) get the provider's servers.
    #[must_use]
    pub fn from_identity(identity: &Identity, provider: ProviderKind, auth_type: AuthType) -> Self {
        let mut account = Self::with_email(&identity.email);
        account.apply_provider(provider);
        account.auth_type = auth_type;
        if let Some(name) = &identity.display_name {
            account.display_name.clone_from(name);
        }
        account
    }

    /// Sets the provider and fills in its server settings, if it has any.
    pub fn apply_provider(&mut self, provider: ProviderKind) {
        self.provider = provider;
        if let Some(preset) = provider.preset() {
            self.imap.host = preset.imap_host.to_string();
            self.imap.port = preset.imap_port;
            self.imap.security = preset.imap_security;
            self.smtp.host = preset.smtp_host.to_string();
            self.smtp.port = preset.smtp_port;
            self.smtp.security = preset.smtp_security;
        }
    }

    /// Returns true for `OAuth2` accounts.
    #[must_use]
    pub const fn uses_oauth(&self) -> bool {
        matches!(self.auth_type, AuthType::OAuth2)
    }
}

fn local_part(email: &str) -> &str {
    email.split_once('@').map_or(email, |(local, _)| local)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone)]
mod tests {
    use super::*;

    mod account_id_tests {
        use super::*;

        #[test]
        fn display() {
            assert_eq!(format!("{}", AccountId::new(123)), "123");
        }

        #[test]
        fn ordering_follows_value() {
            assert!(AccountId::new(1) < AccountId::new(2));
        }
    }

    mod storage_key_tests {
        use super::*;

        #[test]
        fn security_keys() {
            for security in [Security::None, Security::Tls, Security::StartTls] {
                assert_eq!(Security::parse(security.as_str()), security);
            }
            assert_eq!(Security::parse("bogus"), Security::Tls);
        }

        #[test]
        fn auth_type_keys() {
            assert_eq!(AuthType::parse("oauth2"), AuthType::OAuth2);
            assert_eq!(AuthType::parse("password"), AuthType::Password);
            assert_eq!(AuthType::parse(""), AuthType::Password);
        }

        #[test]
        fn provider_keys() {
            for kind in ProviderKind::ALL {
                assert_eq!(ProviderKind::parse(kind.as_str()), kind);
            }
            assert_eq!(ProviderKind::parse("Gmail"), ProviderKind::Gmail);
            assert_eq!(ProviderKind::parse("fastmail"), ProviderKind::Custom);
        }
    }

    mod provider_tests {
        use super::*;

        #[test]
        fn detection_from_domain() {
            assert_eq!(ProviderKind::from_email("a@gmail.com"), ProviderKind::Gmail);
            assert_eq!(ProviderKind::from_email("a@GoogleMail.com"), ProviderKind::Gmail);
            assert_eq!(ProviderKind::from_email("a@hotmail.com"), ProviderKind::Outlook);
            assert_eq!(ProviderKind::from_email("a@ymail.com"), ProviderKind::Yahoo);
            assert_eq!(ProviderKind::from_email("a@me.com"), ProviderKind::ICloud);
            assert_eq!(ProviderKind::from_email("a@example.org"), ProviderKind::Custom);
            assert_eq!(ProviderKind::from_email("nonsense"), ProviderKind::Custom);
        }

        #[test]
        fn oauth_support() {
            assert!(ProviderKind::Gmail.supports_oauth());
            assert!(!ProviderKind::ICloud.supports_oauth());
            assert!(ProviderKind::Gmail.oauth_provider().unwrap().is_some());
            assert!(ProviderKind::Custom.oauth_provider().unwrap().is_none());
        }
    }

    mod account_tests {
        use super::*;

        #[test]
        fn with_email_gmail() {
            let account = Account::with_email("user@gmail.com");
            assert_eq!(account.provider, ProviderKind::Gmail);
            assert_eq!(account.display_name, "user");
            assert_eq!(account.imap.host, "imap.gmail.com");
            assert_eq!(account.imap.port, 993);
            assert_eq!(account.smtp.host, "smtp.gmail.com");
            assert_eq!(account.smtp.port, 465);
            assert_eq!(account.imap.username, "user@gmail.com");
            assert_eq!(account.auth_type, AuthType::Password);
        }

        #[test]
        fn with_email_outlook_uses_starttls_for_smtp() {
            let account = Account::with_email("user@outlook.com");
            assert_eq!(account.smtp.host, "smtp.office365.com");
            assert_eq!(account.smtp.port, 587);
            assert_eq!(account.smtp.security, Security::StartTls);
        }

        #[test]
        fn with_email_unknown_domain_leaves_servers_empty() {
            let account = Account::with_email("user@example.org");
            assert_eq!(account.provider, ProviderKind::Custom);
            assert!(account.imap.host.is_empty());
            assert!(account.smtp.host.is_empty());
        }

        #[test]
        fn with_email_trims() {
            let account = Account::with_email("  user@example.org ");
            assert_eq!(account.email, "user@example.org");
            assert_eq!(account.smtp.username, "user@example.org");
        }

        #[test]
        fn from_identity_hosted_domain() {
            let identity = Identity {
                email: "ceo@startup.io".into(),
                display_name: Some("The CEO".into()),
                picture: None,
            };

            let account = Account::from_identity(&identity, ProviderKind::Gmail, AuthType::OAuth2);

            assert_eq!(account.provider, ProviderKind::Gmail);
            assert_eq!(account.imap.host, "imap.gmail.com");
            assert_eq!(account.display_name, "The CEO");
            assert!(account.uses_oauth());
            assert!(account.imap.password.is_empty());
        }
    }
}
