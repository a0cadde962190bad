//! Command-line options.

use clap::{Args, Parser, Subcommand, ValueEnum};
use mailkey_core::{AccountId, ProviderKind};

/// Sign in to mail accounts with `OAuth2` and keep their tokens fresh.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Config file to load instead of the default location.
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in through the provider's consent page and store the account.
    SignIn {
        /// Provider to sign in with.
        #[arg(long, value_enum)]
        provider: OAuthProvider,
        /// Print the consent URL instead of opening a browser.
        #[arg(long)]
        no_browser: bool,
    },
    /// Add an account that logs in with a password.
    AddCustom(CustomAccount),
    /// List stored accounts.
    List,
    /// Make an account the selected one.
    Select {
        /// Account ID.
        id: i64,
    },
    /// Remove an account and its stored secrets.
    Remove {
        /// Account ID.
        id: i64,
    },
    /// Print a valid access token, refreshing it first if needed.
    Token {
        /// Account ID; defaults to the selected account.
        id: Option<i64>,
        /// Refresh even if the stored token is still valid.
        #[arg(long)]
        force: bool,
    },
    /// Ask the provider which scopes and client the token was issued for.
    Check {
        /// Account ID; defaults to the selected account.
        id: Option<i64>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Gmail,
    Outlook,
    Yahoo,
}

impl From<OAuthProvider> for ProviderKind {
    fn from(provider: OAuthProvider) -> Self {
        match provider {
            OAuthProvider::Gmail => Self::Gmail,
            OAuthProvider::Outlook => Self::Outlook,
            OAuthProvider::Yahoo => Self::Yahoo,
        }
    }
}

#[derive(Args, Debug)]
pub struct CustomAccount {
    /// Email address.
    #[arg(long)]
    pub email: String,
    /// Name shown in the account list; defaults to the email's local part.
    #[arg(long)]
    pub name: Option<String>,
    /// IMAP server; defaults to the provider's when the domain is known.
    #[arg(long)]
    pub imap_host: Option<String>,
    #[arg(long)]
    pub imap_port: Option<u16>,
    /// One of `tls`, `starttls`, `none`.
    #[arg(long)]
    pub imap_security: Option<String>,
    #[arg(long)]
    pub smtp_host: Option<String>,
    #[arg(long)]
    pub smtp_port: Option<u16>,
    /// One of `tls`, `starttls`, `none`.
    #[arg(long)]
    pub smtp_security: Option<String>,
    /// Login name, if it differs from the email address.
    #[arg(long)]
    pub username: Option<String>,
    /// Password for both servers.
    #[arg(long)]
    pub password: String,
    /// SMTP password, if it differs from the IMAP one.
    #[arg(long)]
    pub smtp_password: Option<String>,
}

/// Converts an optional ID argument.
pub fn account_id(id: Option<i64>) -> Option<AccountId> {
    id.map(AccountId)
}
