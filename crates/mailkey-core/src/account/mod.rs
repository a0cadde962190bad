//! Account management module.
//!
//! Provides account configuration, storage, and validation.

pub mod credentials;
mod model;
mod repository;
mod validation;

pub use credentials::{
    CredentialError, CredentialKind, CredentialResult, CredentialStore, KeyringCredentials,
    MemoryCredentials,
};
pub use model::{Account, AccountId, AuthType, ImapConfig, ProviderKind, Security, SmtpConfig};
pub use repository::AccountRepository;
pub use validation::{ValidationError, ValidationResult, is_valid_email, validate_account};
