//! Account storage repository.
//!
//! Account settings live in `SQLite`; secrets (passwords, `OAuth2` tokens) live
//! in a [`CredentialStore`]. Writes that touch both are made atomic by holding
//! the `SQLite` transaction open across the credential write.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use mailkey_oauth::Token;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info, warn};

use super::credentials::{CredentialKind, CredentialResult, CredentialStore};
use super::model::{Account, AccountId, AuthType, ImapConfig, ProviderKind, Security, SmtpConfig};
use crate::{Error, Result};

const ACCOUNT_COLUMNS: &str = r"
    id, display_name, email, provider, auth_type,
    imap_host, imap_port, imap_security, imap_username,
    smtp_host, smtp_port, smtp_security, smtp_username,
    is_default, needs_reauth
";

/// Repository for account storage and retrieval.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
    credentials: Arc<dyn CredentialStore>,
}

impl AccountRepository {
    /// Opens (creating if needed) the database at `database_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(database_path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool, credentials };
        repo.initialize().await?;
        debug!(path = database_path, "Opened account database");
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory(credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        // A single connection that never idles out, or the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool, credentials };
        repo.initialize().await?;
        Ok(repo)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                display_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                provider TEXT NOT NULL,
                auth_type TEXT NOT NULL,
                imap_host TEXT NOT NULL,
                imap_port INTEGER NOT NULL,
                imap_security TEXT NOT NULL,
                imap_username TEXT NOT NULL,
                smtp_host TEXT NOT NULL,
                smtp_port INTEGER NOT NULL,
                smtp_security TEXT NOT NULL,
                smtp_username TEXT NOT NULL,
                is_default INTEGER NOT NULL DEFAULT 0,
                needs_reauth INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS selection (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                account_id INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The credential store backing this repository.
    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    /// All accounts, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| self.row_to_account(row)).collect())
    }

    /// Loads an account by ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] if no such account exists, or a
    /// database error.
    pub async fn load(&self, id: AccountId) -> Result<Account> {
        self.get(id).await?.ok_or(Error::AccountNotFound(id))
    }

    /// Looks up an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(|row| self.row_to_account(row)))
    }

    /// Looks up an account by email, ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(|row| self.row_to_account(row)))
    }

    /// Loads the stored `OAuth2` token for an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store cannot be read.
    pub fn load_token(&self, id: AccountId) -> Result<Option<Token>> {
        Ok(self.credentials.load_token(id)?)
    }

    /// Saves an account together with its `OAuth2` token.
    ///
    /// Both land or neither does: if the token cannot be stored the row
    /// change is rolled back, and if the commit fails the token is removed.
    /// Assigns `account.id` on insert.
    ///
    /// # Errors
    ///
    /// Returns a database or credential error; the account is unchanged on
    /// disk in that case.
    pub async fn save_with_token(&self, account: &mut Account, token: &Token) -> Result<AccountId> {
        let drop_passwords = account.uses_oauth();
        self.persist(account, move |store, id| {
            store.store_token(id, token)?;
            if drop_passwords {
                // Left over from a password account that switched to OAuth2.
                for kind in [CredentialKind::ImapPassword, CredentialKind::SmtpPassword] {
                    if let Err(e) = store.delete(id, kind) {
                        warn!(account = id.0, "Failed to remove stale {kind:?}: {e}");
                    }
                }
            }
            Ok(())
        })
        .await
    }

    /// Saves an account, storing its passwords in the credential store.
    ///
    /// Same all-or-nothing behavior as [`Self::save_with_token`].
    ///
    /// # Errors
    ///
    /// Returns a database or credential error.
    pub async fn save(&self, account: &mut Account) -> Result<AccountId> {
        let imap = account.imap.password.clone();
        let smtp = account.smtp.password.clone();
        self.persist(account, move |store, id| {
            if imap.is_empty() && smtp.is_empty() {
                return Ok(());
            }
            store.store_passwords(Some(id), &imap, &smtp)
        })
        .await
    }

    async fn persist<F>(&self, account: &mut Account, write_secrets: F) -> Result<AccountId>
    where
        F: FnOnce(&dyn CredentialStore, AccountId) -> CredentialResult<()>,
    {
        let mut tx = self.pool.begin().await?;
        let id = upsert(&mut *tx, account).await?;

        if let Err(e) = write_secrets(self.credentials.as_ref(), id) {
            warn!(account = id.0, "Credential write failed, rolling back: {e}");
            tx.rollback().await?;
            return Err(e.into());
        }

        if let Err(e) = tx.commit().await {
            warn!(account = id.0, "Commit failed, removing stored credentials: {e}");
            if let Err(cleanup) = self.credentials.delete_all(id) {
                warn!(account = id.0, "Failed to remove orphaned credentials: {cleanup}");
            }
            return Err(e.into());
        }

        account.id = Some(id);
        debug!(account = id.0, email = %account.email, "Saved account");
        Ok(id)
    }

    /// Replaces the stored token of an existing account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] for unknown IDs, or a storage error.
    pub async fn update_token(&self, id: AccountId, token: &Token) -> Result<()> {
        let touched = sqlx::query("UPDATE accounts SET updated_at = ? WHERE id = ?")
            .bind(timestamp_now())
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if touched == 0 {
            return Err(Error::AccountNotFound(id));
        }

        self.credentials.store_token(id, token)?;
        debug!(account = id.0, expires_at = %token.expires_at, "Stored refreshed token");
        Ok(())
    }

    /// Sets or clears the re-authentication flag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] for unknown IDs, or a database error.
    pub async fn set_needs_reauth(&self, id: AccountId, needs_reauth: bool) -> Result<()> {
        let touched =
            sqlx::query("UPDATE accounts SET needs_reauth = ?, updated_at = ? WHERE id = ?")
                .bind(needs_reauth)
                .bind(timestamp_now())
                .bind(id.0)
                .execute(&self.pool)
                .await?
                .rows_affected();
        if touched == 0 {
            return Err(Error::AccountNotFound(id));
        }
        Ok(())
    }

    /// Deletes an account and every secret held for it.
    ///
    /// Clears the selection if it pointed at this account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] for unknown IDs, or a database error.
    pub async fn delete(&self, id: AccountId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Err(Error::AccountNotFound(id));
        }
        sqlx::query("DELETE FROM selection WHERE account_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if let Err(e) = self.credentials.delete_all(id) {
            warn!(account = id.0, "Failed to delete credentials: {e}");
        }
        info!(account = id.0, "Deleted account");
        Ok(())
    }

    /// Records the selected account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] for unknown IDs, or a database error.
    pub async fn set_selected(&self, id: AccountId) -> Result<()> {
        if self.get(id).await?.is_none() {
            return Err(Error::AccountNotFound(id));
        }
        sqlx::query(
            r"
            INSERT INTO selection (slot, account_id) VALUES (1, ?)
            ON CONFLICT(slot) DO UPDATE SET account_id = excluded.account_id
            ",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The recorded selection, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn selected_id(&self) -> Result<Option<AccountId>> {
        let row = sqlx::query("SELECT account_id FROM selection WHERE slot = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| AccountId::new(row.get("account_id"))))
    }

    /// Resolves which account to use.
    ///
    /// Order: the explicit `id`, then the recorded selection, then the
    /// default account, then the most recently created account. Returns
    /// `None` only when no accounts exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] if an explicit `id` does not exist,
    /// or a database error.
    pub async fn select(&self, id: Option<AccountId>) -> Result<Option<Account>> {
        if let Some(id) = id {
            return self.load(id).await.map(Some);
        }

        if let Some(selected) = self.selected_id().await? {
            if let Some(account) = self.get(selected).await? {
                return Ok(Some(account));
            }
            debug!(account = selected.0, "Recorded selection no longer exists");
        }

        let row = sqlx::query(&format!(
            r"
            SELECT {ACCOUNT_COLUMNS} FROM accounts
            ORDER BY is_default DESC, created_at DESC, id DESC
            LIMIT 1
            "
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(|row| self.row_to_account(row)))
    }

    fn row_to_account(&self, row: &SqliteRow) -> Account {
        let id = AccountId::new(row.get("id"));
        let auth_type = AuthType::parse(row.get("auth_type"));

        let (imap_password, smtp_password) = if auth_type == AuthType::Password {
            match self.credentials.load_passwords(Some(id)) {
                Ok((imap, smtp)) => (imap.unwrap_or_default(), smtp.unwrap_or_default()),
                Err(e) => {
                    warn!(account = id.0, "Failed to load passwords: {e}");
                    (String::new(), String::new())
                }
            }
        } else {
            (String::new(), String::new())
        };

        Account {
            id: Some(id),
            display_name: row.get("display_name"),
            email: row.get("email"),
            provider: ProviderKind::parse(row.get("provider")),
            auth_type,
            imap: ImapConfig {
                host: row.get("imap_host"),
                port: port_from_db(row.get("imap_port")),
                security: Security::parse(row.get("imap_security")),
                username: row.get("imap_username"),
                password: imap_password,
            },
            smtp: SmtpConfig {
                host: row.get("smtp_host"),
                port: port_from_db(row.get("smtp_port")),
                security: Security::parse(row.get("smtp_security")),
                username: row.get("smtp_username"),
                password: smtp_password,
            },
            is_default: row.get::<i64, _>("is_default") != 0,
            needs_reauth: row.get::<i64, _>("needs_reauth") != 0,
        }
    }
}

/// Inserts or updates the account row inside `conn`'s transaction.
async fn upsert(conn: &mut SqliteConnection, account: &Account) -> Result<AccountId> {
    let now = timestamp_now();

    let id = if let Some(id) = account.id {
        let touched = sqlx::query(
            r"
            UPDATE accounts SET
                display_name = ?, email = ?, provider = ?, auth_type = ?,
                imap_host = ?, imap_port = ?, imap_security = ?, imap_username = ?,
                smtp_host = ?, smtp_port = ?, smtp_security = ?, smtp_username = ?,
                is_default = ?, needs_reauth = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(&account.display_name)
        .bind(account.email.trim())
        .bind(account.provider.as_str())
        .bind(account.auth_type.as_str())
        .bind(&account.imap.host)
        .bind(i64::from(account.imap.port))
        .bind(account.imap.security.as_str())
        .bind(&account.imap.username)
        .bind(&account.smtp.host)
        .bind(i64::from(account.smtp.port))
        .bind(account.smtp.security.as_str())
        .bind(&account.smtp.username)
        .bind(account.is_default)
        .bind(account.needs_reauth)
        .bind(&now)
        .bind(id.0)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        if touched == 0 {
            return Err(Error::AccountNotFound(id));
        }
        id
    } else {
        let result = sqlx::query(
            r"
            INSERT INTO accounts (
                display_name, email, provider, auth_type,
                imap_host, imap_port, imap_security, imap_username,
                smtp_host, smtp_port, smtp_security, smtp_username,
                is_default, needs_reauth, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&account.display_name)
        .bind(account.email.trim())
        .bind(account.provider.as_str())
        .bind(account.auth_type.as_str())
        .bind(&account.imap.host)
        .bind(i64::from(account.imap.port))
        .bind(account.imap.security.as_str())
        .bind(&account.imap.username)
        .bind(&account.smtp.host)
        .bind(i64::from(account.smtp.port))
        .bind(account.smtp.security.as_str())
        .bind(&account.smtp.username)
        .bind(account.is_default)
        .bind(account.needs_reauth)
        .bind(&now)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        AccountId::new(result.last_insert_rowid())
    };

    if account.is_default {
        sqlx::query("UPDATE accounts SET is_default = 0 WHERE id != ?")
            .bind(id.0)
            .execute(&mut *conn)
            .await?;
    }

    Ok(id)
}

/// Microsecond RFC 3339 in UTC; sorts lexically in creation order.
fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn port_from_db(raw: i64) -> u16 {
    u16::try_from(raw).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::account::MemoryCredentials;

    async fn repo() -> (AccountRepository, Arc<MemoryCredentials>) {
        let store = Arc::new(MemoryCredentials::new());
        let repo = AccountRepository::in_memory(store.clone()).await.unwrap();
        (repo, store)
    }

    fn oauth_account(email: &str) -> Account {
        let mut account = Account::with_email(email);
        account.auth_type = AuthType::OAuth2;
        account
    }

    fn token(access: &str) -> Token {
        Token::new(access, "Bearer", Utc::now() + TimeDelta::hours(1))
            .with_refresh_token("refresh")
    }

    #[tokio::test]
    async fn test_save_with_token_and_load() {
        let (repo, _) = repo().await;
        let mut account = oauth_account("test@gmail.com");

        let id = repo.save_with_token(&mut account, &token("a1")).await.unwrap();

        assert_eq!(account.id, Some(id));
        let loaded = repo.load(id).await.unwrap();
        assert_eq!(loaded.email, "test@gmail.com");
        assert_eq!(loaded.provider, ProviderKind::Gmail);
        assert_eq!(loaded.auth_type, AuthType::OAuth2);
        assert!(!loaded.needs_reauth);
        assert_eq!(repo.load_token(id).unwrap().unwrap().access_token, "a1");
    }

    #[tokio::test]
    async fn test_password_account_secrets_stay_out_of_sqlite() {
        let (repo, store) = repo().await;
        let mut account = Account::with_email("test@example.com");
        account.imap.password = "imap-secret".to_string();
        account.smtp.password = "smtp-secret".to_string();

        let id = repo.save(&mut account).await.unwrap();

        assert_eq!(store.len(), 2);
        let loaded = repo.load(id).await.unwrap();
        assert_eq!(loaded.imap.password, "imap-secret");
        assert_eq!(loaded.smtp.password, "smtp-secret");
    }

    #[tokio::test]
    async fn test_credential_failure_rolls_back_insert() {
        let (repo, store) = repo().await;
        store.set_fail_writes(true);
        let mut account = oauth_account("test@gmail.com");

        let result = repo.save_with_token(&mut account, &token("a1")).await;

        assert!(matches!(result, Err(Error::Credential(_))));
        assert!(account.id.is_none());
        assert!(repo.list().await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_account() {
        let (repo, _) = repo().await;
        assert!(matches!(
            repo.load(AccountId::new(42)).await,
            Err(Error::AccountNotFound(AccountId(42)))
        ));
    }

    #[tokio::test]
    async fn test_find_by_email_ignores_case() {
        let (repo, _) = repo().await;
        let mut account = oauth_account("Person@Gmail.com");
        repo.save_with_token(&mut account, &token("a")).await.unwrap();

        let found = repo.find_by_email(" person@gmail.com").await.unwrap();
        assert_eq!(found.unwrap().id, account.id);
    }

    #[tokio::test]
    async fn test_update_token_and_reauth_flag() {
        let (repo, _) = repo().await;
        let mut account = oauth_account("test@gmail.com");
        let id = repo.save_with_token(&mut account, &token("old")).await.unwrap();

        repo.update_token(id, &token("new")).await.unwrap();
        repo.set_needs_reauth(id, true).await.unwrap();

        assert_eq!(repo.load_token(id).unwrap().unwrap().access_token, "new");
        assert!(repo.load(id).await.unwrap().needs_reauth);

        assert!(matches!(
            repo.update_token(AccountId::new(99), &token("x")).await,
            Err(Error::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_credentials_and_selection() {
        let (repo, store) = repo().await;
        let mut account = oauth_account("test@gmail.com");
        let id = repo.save_with_token(&mut account, &token("a")).await.unwrap();
        repo.set_selected(id).await.unwrap();

        repo.delete(id).await.unwrap();

        assert!(repo.get(id).await.unwrap().is_none());
        assert!(repo.selected_id().await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_select_order() {
        let (repo, _) = repo().await;
        assert!(repo.select(None).await.unwrap().is_none());

        let mut zed = oauth_account("zed@gmail.com");
        let zed_id = repo.save_with_token(&mut zed, &token("z")).await.unwrap();
        let mut amy = oauth_account("amy@gmail.com");
        let amy_id = repo.save_with_token(&mut amy, &token("a")).await.unwrap();

        // Newest wins, not alphabetical.
        assert_eq!(repo.select(None).await.unwrap().unwrap().id, Some(amy_id));

        repo.set_selected(zed_id).await.unwrap();
        assert_eq!(repo.select(None).await.unwrap().unwrap().id, Some(zed_id));

        assert_eq!(
            repo.select(Some(amy_id)).await.unwrap().unwrap().id,
            Some(amy_id)
        );
        assert!(matches!(
            repo.select(Some(AccountId::new(77))).await,
            Err(Error::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_default_account_beats_newest() {
        let (repo, _) = repo().await;
        let mut first = oauth_account("first@gmail.com");
        first.is_default = true;
        let first_id = repo.save_with_token(&mut first, &token("1")).await.unwrap();
        let mut second = oauth_account("second@gmail.com");
        repo.save_with_token(&mut second, &token("2")).await.unwrap();

        assert_eq!(repo.select(None).await.unwrap().unwrap().id, Some(first_id));
    }
}
