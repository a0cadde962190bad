//! # mailkey-core
//!
//! Account onboarding and token lifecycle for the `mailkey` email client.
//!
//! This crate provides:
//! - Account model, validation and `SQLite` storage with keyring-held secrets
//! - **Sign-in**: authorization code exchange, identity lookup, provisioning
//! - **Refresh guard**: per-account serialized token refresh before sessions
//! - **Sessions**: bearer/password credentials handed to an IMAP/SMTP opener,
//!   with one forced refresh when the server rejects a token
//! - Scope diagnostics and configuration loading

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod account;
pub mod backend;
pub mod config;
pub mod diagnostics;
mod error;
pub mod guard;
pub mod provision;
pub mod session;
pub mod signin;

pub use account::credentials;
pub use account::{
    Account, AccountId, AccountRepository, AuthType, ImapConfig, ProviderKind, Security,
    SmtpConfig,
};
pub use account::{
    CredentialError, CredentialKind, CredentialResult, CredentialStore, KeyringCredentials,
    MemoryCredentials, ValidationError, ValidationResult, validate_account,
};
pub use backend::{AuthBackend, ProviderClients};
pub use config::{Config, OAuthAppConfig, RefreshPolicy};
pub use diagnostics::ScopeReport;
pub use error::{Error, Result};
pub use guard::{RefreshGuard, TokenState};
pub use provision::Provisioner;
pub use session::{Protocol, SessionCredentials, SessionError, SessionManager, SessionOpener};
pub use signin::{CancelHandle, SignIn};
