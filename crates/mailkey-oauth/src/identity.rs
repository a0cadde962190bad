//! Account identity returned by a provider's userinfo endpoint.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Who the token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Email address, trimmed and never empty.
    pub email: String,
    /// Display name, if the provider shares one.
    pub display_name: Option<String>,
    /// Avatar URL.
    pub picture: Option<String>,
}

impl Identity {
    /// Builds an identity from a raw userinfo body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingEmail`] when the response has no non-blank
    /// `email` field.
    pub fn from_userinfo(info: UserInfo) -> Result<Self> {
        let email = info
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or(Error::MissingEmail)?;

        let display_name = info
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(Self {
            email,
            display_name,
            picture: info.picture,
        })
    }
}

/// Userinfo response body. Only `email` is required downstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Full name.
    #[serde(default)]
    pub name: Option<String>,
    /// Avatar URL.
    #[serde(default)]
    pub picture: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn email_is_trimmed() {
        let info: UserInfo = serde_json::from_str(
            r#"{"email": " user@gmail.com\n", "name": "Ada Lovelace", "picture": "https://x/y.png"}"#,
        )
        .unwrap();

        let identity = Identity::from_userinfo(info).unwrap();
        assert_eq!(identity.email, "user@gmail.com");
        assert_eq!(identity.display_name.as_deref(), Some("Ada Lovelace"));
        assert!(identity.picture.is_some());
    }

    #[test]
    fn missing_email_rejected() {
        let info: UserInfo = serde_json::from_str(r#"{"name": "No Mail"}"#).unwrap();
        assert!(matches!(
            Identity::from_userinfo(info),
            Err(Error::MissingEmail)
        ));
    }

    #[test]
    fn blank_email_rejected() {
        let info = UserInfo {
            email: Some("   ".into()),
            ..UserInfo::default()
        };
        assert!(matches!(
            Identity::from_userinfo(info),
            Err(Error::MissingEmail)
        ));
    }

    #[test]
    fn blank_name_dropped() {
        let info = UserInfo {
            email: Some("a@b.c".into()),
            name: Some(String::new()),
            picture: None,
        };
        assert_eq!(Identity::from_userinfo(info).unwrap().display_name, None);
    }
}
