//! Checks run before an account is stored.

use thiserror::Error;

use super::model::{Account, Security};
use crate::session::Protocol;

/// A problem with an account's settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Display name is empty.
    #[error("Display name is required")]
    EmptyName,
    /// Email address is empty.
    #[error("Email address is required")]
    EmptyEmail,
    /// Email address is malformed.
    #[error("{0:?} is not a valid email address")]
    InvalidEmail(String),
    /// Server host is empty.
    #[error("{0} server is required")]
    MissingHost(Protocol),
    /// Server port is zero.
    #[error("{0} port must be 1-65535")]
    InvalidPort(Protocol),
    /// Login name is empty.
    #[error("{0} username is required")]
    MissingUsername(Protocol),
    /// Password account without a password.
    #[error("{0} password is required")]
    MissingPassword(Protocol),
    /// Bearer tokens are never sent over an unencrypted connection.
    #[error("{0} must use TLS or STARTTLS for OAuth2 sign-in")]
    PlaintextBearer(Protocol),
    /// `OAuth2` account for a provider without `OAuth2`.
    #[error("{0} does not support OAuth2 sign-in")]
    OAuthUnsupported(String),
}

impl ValidationError {
    /// Setting the error belongs to, as named on the command line.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyName => "name",
            Self::EmptyEmail | Self::InvalidEmail(_) => "email",
            Self::OAuthUnsupported(_) => "provider",
            Self::MissingHost(Protocol::Imap) => "imap-host",
            Self::MissingHost(Protocol::Smtp) => "smtp-host",
            Self::InvalidPort(Protocol::Imap) => "imap-port",
            Self::InvalidPort(Protocol::Smtp) => "smtp-port",
            Self::PlaintextBearer(Protocol::Imap) => "imap-security",
            Self::PlaintextBearer(Protocol::Smtp) => "smtp-security",
            Self::MissingUsername(_) => "username",
            Self::MissingPassword(Protocol::Imap) => "password",
            Self::MissingPassword(Protocol::Smtp) => "smtp-password",
        }
    }
}

/// Every problem found, or nothing.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validates an account, collecting every problem.
///
/// Password accounts need a password for each server. `OAuth2` accounts need
/// a provider that issues tokens and encrypted connections to both servers.
///
/// # Errors
///
/// Returns every [`ValidationError`] found.
pub fn validate_account(account: &Account) -> ValidationResult {
    let mut errors = Vec::new();

    if account.display_name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }
    let email = account.email.trim();
    if email.is_empty() {
        errors.push(ValidationError::EmptyEmail);
    } else if !is_valid_email(email) {
        errors.push(ValidationError::InvalidEmail(email.to_string()));
    }

    if account.uses_oauth() && !account.provider.supports_oauth() {
        errors.push(ValidationError::OAuthUnsupported(
            account.provider.display_name().to_string(),
        ));
    }

    let servers = [
        (
            Protocol::Imap,
            &account.imap.host,
            account.imap.port,
            account.imap.security,
            &account.imap.username,
            &account.imap.password,
        ),
        (
            Protocol::Smtp,
            &account.smtp.host,
            account.smtp.port,
            account.smtp.security,
            &account.smtp.username,
            &account.smtp.password,
        ),
    ];
    for (protocol, host, port, security, username, password) in servers {
        if host.trim().is_empty() {
            errors.push(ValidationError::MissingHost(protocol));
        }
        if port == 0 {
            errors.push(ValidationError::InvalidPort(protocol));
        }
        if username.trim().is_empty() {
            errors.push(ValidationError::MissingUsername(protocol));
        }
        if account.uses_oauth() {
            if security == Security::None {
                errors.push(ValidationError::PlaintextBearer(protocol));
            }
        } else if password.is_empty() {
            errors.push(ValidationError::MissingPassword(protocol));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Checks for `local@domain.tld` with no empty labels.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && domain.split('.').all(|label| !label.is_empty())
        }
        None => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::account::{AuthType, ProviderKind};

    fn password_account() -> Account {
        let mut account = Account::with_email("test@gmail.com");
        account.imap.password = "secret".to_string();
        account.smtp.password = "secret".to_string();
        account
    }

    #[test]
    fn email_shapes() {
        for ok in ["user@example.com", "first.last@sub.example.com", " user@example.com "] {
            assert!(is_valid_email(ok), "{ok}");
        }
        for bad in ["", "user", "@example.com", "user@", "user@example", "a@@b.com", "a@b..com"] {
            assert!(!is_valid_email(bad), "{bad}");
        }
    }

    #[test]
    fn empty_account_reports_everything() {
        let errors = validate_account(&Account::new()).unwrap_err();
        assert!(errors.contains(&ValidationError::EmptyName));
        assert!(errors.contains(&ValidationError::EmptyEmail));
        assert!(errors.contains(&ValidationError::MissingHost(Protocol::Smtp)));
        assert!(errors.contains(&ValidationError::MissingPassword(Protocol::Imap)));
    }

    #[test]
    fn password_account_needs_both_passwords() {
        let mut account = password_account();
        assert!(validate_account(&account).is_ok());

        account.smtp.password.clear();
        assert_eq!(
            validate_account(&account).unwrap_err(),
            vec![ValidationError::MissingPassword(Protocol::Smtp)]
        );
    }

    #[test]
    fn oauth_account_needs_no_passwords() {
        let mut account = Account::with_email("test@gmail.com");
        account.auth_type = AuthType::OAuth2;
        assert!(validate_account(&account).is_ok());
    }

    #[test]
    fn oauth_rejects_plaintext_and_unsupported_providers() {
        let mut account = Account::with_email("me@example.org");
        account.auth_type = AuthType::OAuth2;
        account.imap.host = "mail.example.org".into();
        account.imap.port = 143;
        account.imap.security = Security::None;
        account.smtp.host = "mail.example.org".into();
        account.smtp.port = 587;
        account.smtp.security = Security::StartTls;
        assert_eq!(account.provider, ProviderKind::Custom);

        let errors = validate_account(&account).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ValidationError::OAuthUnsupported(_)));
        assert_eq!(errors[1], ValidationError::PlaintextBearer(Protocol::Imap));
        assert_eq!(errors[1].field(), "imap-security");
    }

    #[test]
    fn messages_name_the_protocol() {
        assert_eq!(
            ValidationError::MissingHost(Protocol::Smtp).to_string(),
            "SMTP server is required"
        );
        assert_eq!(
            ValidationError::InvalidEmail("nope".into()).to_string(),
            "\"nope\" is not a valid email address"
        );
    }
}
