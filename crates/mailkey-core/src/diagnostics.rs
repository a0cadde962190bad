//! Explains why a mail server might reject an otherwise valid token.

use std::collections::BTreeSet;
use std::fmt;

use mailkey_oauth::TokenInfo;

/// Findings from introspecting one account's token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeReport {
    /// Scopes the provider says were granted.
    pub granted: BTreeSet<String>,
    /// Scope IMAP/SMTP require, if the provider has one.
    pub mail_scope: Option<String>,
    /// Client the token was issued to.
    pub audience: Option<String>,
    /// Client ID this installation is configured with.
    pub client_id: String,
    /// Email the token was issued for.
    pub token_email: Option<String>,
    /// Email stored on the account.
    pub account_email: String,
    /// Seconds the provider says the token has left.
    pub expires_in: Option<i64>,
}

impl ScopeReport {
    /// Compares a tokeninfo response with the account and configuration.
    #[must_use]
    pub fn new(
        info: &TokenInfo,
        mail_scope: Option<&str>,
        client_id: &str,
        account_email: &str,
    ) -> Self {
        Self {
            granted: info.scopes(),
            mail_scope: mail_scope.map(str::to_string),
            audience: info.audience.clone(),
            client_id: client_id.to_string(),
            token_email: info.email.clone(),
            account_email: account_email.trim().to_string(),
            expires_in: info.expires_in,
        }
    }

    /// Whether the mail scope was granted. `None` if the provider has no
    /// mail scope to check.
    #[must_use]
    pub fn has_mail_scope(&self) -> Option<bool> {
        self.mail_scope
            .as_ref()
            .map(|scope| self.granted.contains(scope))
    }

    /// Whether the token belongs to the configured client.
    #[must_use]
    pub fn audience_matches(&self) -> Option<bool> {
        self.audience.as_ref().map(|aud| *aud == self.client_id)
    }

    /// Whether the token was issued for the account's address.
    #[must_use]
    pub fn email_matches(&self) -> Option<bool> {
        self.token_email
            .as_ref()
            .map(|email| email.trim().eq_ignore_ascii_case(&self.account_email))
    }

    /// Human-readable problems; empty when nothing looks wrong.
    #[must_use]
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.has_mail_scope() == Some(false)
            && let Some(scope) = &self.mail_scope
        {
            problems.push(format!(
                "token is missing the {scope} scope; remove and re-add the account, and make \
                 sure the scope is enabled on the OAuth consent screen"
            ));
        }
        if self.audience_matches() == Some(false) {
            problems.push(format!(
                "token was issued to client {} but this installation uses {}",
                self.audience.as_deref().unwrap_or_default(),
                self.client_id
            ));
        }
        if self.email_matches() == Some(false) {
            problems.push(format!(
                "token belongs to {} but the account is {}",
                self.token_email.as_deref().unwrap_or_default(),
                self.account_email
            ));
        }
        if self.expires_in.is_some_and(|secs| secs <= 0) {
            problems.push("token has expired".to_string());
        }
        problems
    }

    /// True when [`Self::problems`] is empty.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.problems().is_empty()
    }
}

fn mark(check: Option<bool>) -> &'static str {
    match check {
        Some(true) => "ok",
        Some(false) => "MISMATCH",
        None => "unknown",
    }
}

impl fmt::Display for ScopeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Granted scopes ({}):", self.granted.len())?;
        for scope in &self.granted {
            let marker = if self.mail_scope.as_deref() == Some(scope.as_str()) {
                '*'
            } else {
                ' '
            };
            writeln!(f, "  {marker} {scope}")?;
        }
        if let Some(scope) = &self.mail_scope {
            let status = if self.has_mail_scope() == Some(true) {
                "present"
            } else {
                "MISSING"
            };
            writeln!(f, "Mail scope {scope}: {status}")?;
        }
        writeln!(
            f,
            "Audience: {} ({})",
            self.audience.as_deref().unwrap_or("n/a"),
            mark(self.audience_matches())
        )?;
        writeln!(
            f,
            "Email: {} ({})",
            self.token_email.as_deref().unwrap_or("n/a"),
            mark(self.email_matches())
        )?;
        match self.expires_in {
            Some(secs) => write!(f, "Expires in: {secs} s"),
            None => write!(f, "Expires in: n/a"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIL: &str = "https://mail.google.com/";

    fn info(scope: &str, aud: &str, email: &str) -> TokenInfo {
        TokenInfo {
            scope: scope.to_string(),
            email: Some(email.to_string()),
            expires_in: Some(3500),
            audience: Some(aud.to_string()),
        }
    }

    #[test]
    fn healthy_token() {
        let report = ScopeReport::new(
            &info(&format!("{MAIL} openid email"), "client-1", "User@Gmail.com"),
            Some(MAIL),
            "client-1",
            " user@gmail.com",
        );

        assert_eq!(report.has_mail_scope(), Some(true));
        assert_eq!(report.audience_matches(), Some(true));
        assert_eq!(report.email_matches(), Some(true));
        assert!(report.is_healthy());
        assert!(report.to_string().contains("present"));
    }

    #[test]
    fn missing_scope_and_wrong_client() {
        let report = ScopeReport::new(
            &info("openid email", "other-client", "someone@gmail.com"),
            Some(MAIL),
            "client-1",
            "user@gmail.com",
        );

        let problems = report.problems();
        assert_eq!(problems.len(), 3);
        assert!(problems[0].contains(MAIL));
        assert!(problems[1].contains("other-client"));
        assert!(problems[2].contains("someone@gmail.com"));
        assert!(report.to_string().contains("MISSING"));
    }

    #[test]
    fn providers_without_mail_scope_skip_that_check() {
        let report = ScopeReport::new(&TokenInfo::default(), None, "client-1", "u@x.com");
        assert_eq!(report.has_mail_scope(), None);
        assert_eq!(report.audience_matches(), None);
        assert!(report.is_healthy());
    }
}
