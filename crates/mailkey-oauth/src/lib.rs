//! # mailkey-oauth
//!
//! `OAuth2` token lifecycle library for email protocols (IMAP/SMTP).
//!
//! ## Features
//!
//! - **Authorization Code Flow** with PKCE
//! - **Token clock**: provider expiry values normalized to UTC before any arithmetic
//! - **Exchange client**: code exchange, identity (userinfo) lookup, refresh, tokeninfo
//! - **Provider configurations**: Pre-configured for Gmail, Outlook, Yahoo
//! - **SASL mechanisms**: OAUTHBEARER (RFC 7628) and XOAUTH2 (proprietary)
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailkey_oauth::{Provider, OAuthClient, AuthorizationCodeFlow};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::google()?;
//!     let client = OAuthClient::new("your_client_id", provider)
//!         .with_client_secret("your_secret")
//!         .with_redirect_uri("http://localhost:8080/callback");
//!
//!     let flow = AuthorizationCodeFlow::new(client.clone()).with_pkce();
//!     let auth_url = flow.authorization_url(None, Some("random_state"))?;
//!     println!("Visit: {}", auth_url);
//!
//!     let token = flow.exchange_code("code_from_redirect", None).await?;
//!     let identity = client.fetch_identity(&token).await?;
//!     println!("Signed in as {} until {}", identity.email, token.expires_at);
//!     Ok(())
//! }
//! ```
//!
//! ### Using with IMAP/SMTP
//!
//! ```ignore
//! use mailkey_oauth::sasl::xoauth2_response;
//!
//! let auth_string = xoauth2_response("user@gmail.com", &token.access_token);
//! // Send: AUTHENTICATE XOAUTH2 {auth_string}
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod clock;
mod error;
pub mod flow;
pub mod identity;
pub mod provider;
pub mod sasl;
pub mod token;

pub use clock::{Clock, ExpiryAnomaly, FixedClock, Lifetime, ProviderExpiry, SystemClock};
pub use error::{Error, Result};
pub use flow::{AuthorizationCodeFlow, OAuthClient, PkceChallenge};
pub use identity::Identity;
pub use provider::Provider;
pub use token::{Token, TokenInfo};
