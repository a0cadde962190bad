//! Command implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use mailkey_core::{
    Account, AccountId, AccountRepository, Config, Error as CoreError, ImapConfig,
    KeyringCredentials, ProviderClients, ProviderKind, Provisioner, RefreshGuard, ScopeReport,
    Security, SignIn, SmtpConfig,
};
use mailkey_oauth::{AuthorizationCodeFlow, Token};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{info, warn};

use crate::callback::CallbackListener;
use crate::cli::{self, Cli, Command, CustomAccount};

/// How long to wait for the browser to come back with a code.
const SIGN_IN_TIMEOUT: Duration = Duration::from_secs(300);

/// Shared state for one invocation.
struct App {
    config: Config,
    repo: AccountRepository,
}

/// Loads configuration, opens the account store and runs the command.
pub async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::load_from(path).await?;
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
        None => Config::load().await?,
    };
    let repo = AccountRepository::new(
        &config.database_url_path(),
        Arc::new(KeyringCredentials::new()),
    )
    .await
    .with_context(|| format!("opening {}", config.database_path.display()))?;

    let app = App { config, repo };
    match cli.command {
        Command::SignIn {
            provider,
            no_browser,
        } => app.sign_in(provider.into(), no_browser).await,
        Command::AddCustom(args) => app.add_custom(args).await,
        Command::List => app.list().await,
        Command::Select { id } => app.select(AccountId(id)).await,
        Command::Remove { id } => app.remove(AccountId(id)).await,
        Command::Token { id, force } => app.token(cli::account_id(id), force).await,
        Command::Check { id } => app.check(cli::account_id(id)).await,
    }
}

impl App {
    async fn sign_in(&self, provider: ProviderKind, no_browser: bool) -> Result<()> {
        let flow = AuthorizationCodeFlow::new(self.config.oauth_client(provider)?).with_pkce();
        let state = random_state();
        let url = flow.authorization_url(None, Some(&state))?;

        let listener = CallbackListener::bind(&self.config.redirect_uri).await?;
        if no_browser {
            println!("Open this URL to sign in:\n{url}");
        } else if let Err(e) = opener::open(url.as_str()) {
            warn!("Could not open a browser: {e}");
            println!("Open this URL to sign in:\n{url}");
        } else {
            println!("If your browser did not open, navigate to:\n{url}");
        }

        let code = tokio::select! {
            code = listener.wait_for_code(&state) => code?,
            _ = tokio::signal::ctrl_c() => bail!("sign-in cancelled"),
            () = tokio::time::sleep(SIGN_IN_TIMEOUT) => {
                bail!("timed out waiting for the browser to return");
            }
        };

        let backend = Arc::new(ProviderClients::from_config(&self.config));
        let sign_in = SignIn::new(backend, Provisioner::new(self.repo.clone()), provider);
        let cancel = sign_in.cancel_handle();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        let result = sign_in.complete(&code, flow.pkce_verifier()).await;
        watcher.abort();

        let id = result?;
        let account = self.repo.load(id).await?;
        println!("Signed in as {} (account {id}).", account.email);
        Ok(())
    }

    async fn add_custom(&self, args: CustomAccount) -> Result<()> {
        let account = custom_account(args);
        let id = Provisioner::new(self.repo.clone())
            .provision_password(account)
            .await?;
        println!("Added account {id}.");
        Ok(())
    }

    async fn list(&self) -> Result<()> {
        let accounts = self.repo.list().await?;
        if accounts.is_empty() {
            println!("No accounts. Add one with `mailkey sign-in --provider gmail`.");
            return Ok(());
        }

        let selected = self.repo.select(None).await?.and_then(|a| a.id);
        let now = Utc::now();
        for account in &accounts {
            let marker = if account.id == selected { '*' } else { ' ' };
            let id = account.id.map_or(0, |id| id.0);
            let status = self.status(account, now);
            println!(
                "{marker} {id:>3}  {:<32} {:<8} {status}",
                account.email,
                account.provider.as_str()
            );
        }
        Ok(())
    }

    fn status(&self, account: &Account, now: chrono::DateTime<Utc>) -> String {
        if !account.uses_oauth() {
            return "password".to_string();
        }
        if account.needs_reauth {
            return "needs sign-in".to_string();
        }
        let Some(id) = account.id else {
            return String::new();
        };
        match self.repo.load_token(id) {
            Ok(Some(token)) if token.is_expired_at(now) => "token expired".to_string(),
            Ok(Some(token)) => format!(
                "token valid until {}",
                token.expires_at_local().format("%Y-%m-%d %H:%M")
            ),
            Ok(None) => "no token".to_string(),
            Err(e) => format!("token unreadable: {e}"),
        }
    }

    async fn select(&self, id: AccountId) -> Result<()> {
        self.repo.set_selected(id).await?;
        let account = self.repo.load(id).await?;
        println!("Selected {} (account {id}).", account.email);
        Ok(())
    }

    async fn remove(&self, id: AccountId) -> Result<()> {
        let account = self.repo.load(id).await?;
        self.repo.delete(id).await?;
        println!("Removed {} (account {id}).", account.email);
        Ok(())
    }

    async fn token(&self, id: Option<AccountId>, force: bool) -> Result<()> {
        let account = self.resolve(id).await?;
        let token = self.fresh_token(&account, force).await?;
        info!(
            account = %account.email,
            expires_at = %token.expires_at,
            remaining_secs = token.remaining(Utc::now()).num_seconds(),
            "Token ready"
        );
        println!("{}", token.access_token);
        Ok(())
    }

    async fn check(&self, id: Option<AccountId>) -> Result<()> {
        let account = self.resolve(id).await?;
        let token = self.fresh_token(&account, false).await?;

        let provider = account.provider;
        let backend = ProviderClients::from_config(&self.config);
        let token_info = backend
            .token_info(provider, &token)
            .await
            .context("tokeninfo request failed")?;

        let mail_scope = provider.oauth_provider()?.and_then(|p| p.mail_scope);
        let client_id = self
            .config
            .oauth_app(provider)
            .map_or("", |app| app.client_id.as_str());
        let report = ScopeReport::new(&token_info, mail_scope.as_deref(), client_id, &account.email);

        println!("{report}");
        let problems = report.problems();
        if problems.is_empty() {
            return Ok(());
        }
        for problem in &problems {
            println!("problem: {problem}");
        }
        bail!("{} problem(s) found for {}", problems.len(), account.email)
    }

    /// The requested account, or the selected one.
    async fn resolve(&self, id: Option<AccountId>) -> Result<Account> {
        self.repo
            .select(id)
            .await?
            .context("no accounts; add one with `mailkey sign-in`")
    }

    async fn fresh_token(&self, account: &Account, force: bool) -> Result<Token> {
        let id = account.id.context("account has no ID")?;
        if !account.uses_oauth() {
            bail!("{} signs in with a password and has no token", account.email);
        }

        let backend = Arc::new(ProviderClients::from_config(&self.config));
        let guard = RefreshGuard::new(self.repo.clone(), backend, self.config.refresh);
        let result = if force {
            guard.force_refresh(id).await
        } else {
            guard.ensure_valid(id).await
        };

        match result {
            Err(e) if e.requires_reauth() => Err(reauth_hint(e, account.provider)),
            other => Ok(other?),
        }
    }
}

fn reauth_hint(error: CoreError, provider: ProviderKind) -> anyhow::Error {
    anyhow::Error::new(error).context(format!(
        "sign in again with `mailkey sign-in --provider {}`",
        provider.as_str()
    ))
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn custom_account(args: CustomAccount) -> Account {
    let mut account = Account::with_email(&args.email);
    if let Some(name) = args.name {
        account.display_name = name;
    }

    if let Some(host) = args.imap_host {
        account.imap.host = host;
    }
    if let Some(security) = args.imap_security.as_deref().map(Security::parse) {
        account.imap.security = security;
        account.imap.port = ImapConfig::default_port(security);
    }
    if let Some(port) = args.imap_port {
        account.imap.port = port;
    }

    if let Some(host) = args.smtp_host {
        account.smtp.host = host;
    }
    if let Some(security) = args.smtp_security.as_deref().map(Security::parse) {
        account.smtp.security = security;
        account.smtp.port = SmtpConfig::default_port(security);
    }
    if let Some(port) = args.smtp_port {
        account.smtp.port = port;
    }

    if let Some(username) = args.username {
        account.imap.username.clone_from(&username);
        account.smtp.username = username;
    }
    account.smtp.password = args.smtp_password.unwrap_or_else(|| args.password.clone());
    account.imap.password = args.password;
    account
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(email: &str) -> CustomAccount {
        CustomAccount {
            email: email.to_string(),
            name: None,
            imap_host: None,
            imap_port: None,
            imap_security: None,
            smtp_host: None,
            smtp_port: None,
            smtp_security: None,
            username: None,
            password: "secret".to_string(),
            smtp_password: None,
        }
    }

    #[test]
    fn custom_account_keeps_known_presets() {
        let account = custom_account(args("someone@gmail.com"));
        assert_eq!(account.provider, ProviderKind::Gmail);
        assert_eq!(account.imap.host, "imap.gmail.com");
        assert_eq!(account.smtp.password, "secret");
        assert_eq!(account.imap.username, "someone@gmail.com");
    }

    #[test]
    fn security_without_port_uses_its_default_port() {
        let account = custom_account(CustomAccount {
            imap_host: Some("mail.example.org".into()),
            imap_security: Some("starttls".into()),
            smtp_host: Some("mail.example.org".into()),
            smtp_security: Some("starttls".into()),
            smtp_password: Some("other".into()),
            username: Some("me".into()),
            ..args("me@example.org")
        });
        assert_eq!(account.imap.security, Security::StartTls);
        assert_eq!(account.imap.port, 143);
        assert_eq!(account.smtp.port, 587);
        assert_eq!(account.smtp.username, "me");
        assert_eq!(account.smtp.password, "other");
        assert_eq!(account.imap.password, "secret");
    }

    #[test]
    fn state_is_random_alphanumeric() {
        let a = random_state();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, random_state());
    }
}
