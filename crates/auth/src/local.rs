use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::Utc;
use shared::domain::UserId;
use sqlx::{Pool, Row, Sqlite};
use tracing::info;

use crate::{
    AuthError, AuthProvider, AuthSession, SessionSlot, EMAIL_EXISTS, EMAIL_NOT_FOUND,
    INVALID_PASSWORD,
};

/// Credentials kept in the same SQLite database as the records. Password
/// resets are queued in `password_resets` for an out-of-band mailer.
pub struct LocalAuthProvider {
    pool: Pool<Sqlite>,
    session: SessionSlot,
}

fn transport(err: sqlx::Error) -> AuthError {
    AuthError::Transport(err.to_string())
}

/// Argon2id with a fresh random salt, encoded as a PHC string.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Transport(format!("password hashing failed: {err}")))
}

fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(stored)
        .map_err(|err| AuthError::Transport(format!("stored password hash unreadable: {err}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Runs the hashing work off the async worker threads.
async fn blocking<T, F>(work: F) -> Result<T, AuthError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AuthError::Transport(format!("password task failed: {err}")))?
}

impl LocalAuthProvider {
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self, AuthError> {
        let provider = Self {
            pool,
            session: SessionSlot::default(),
        };
        provider.ensure_tables().await?;
        Ok(provider)
    }

    async fn ensure_tables(&self) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                principal_id  TEXT PRIMARY KEY,
                email         TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(transport)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS password_resets (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                email        TEXT NOT NULL,
                requested_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(transport)?;
        Ok(())
    }

    /// Emails with a queued reset, oldest first.
    pub async fn pending_resets(&self) -> Result<Vec<String>, AuthError> {
        let rows = sqlx::query("SELECT email FROM password_resets ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(transport)?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("email").map_err(transport))
            .collect()
    }

    async fn principal_for_email(&self, email: &str) -> Result<Option<UserId>, AuthError> {
        let row = sqlx::query("SELECT principal_id FROM accounts WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(transport)?;
        row.map(|row| row.try_get::<String, _>("principal_id").map(UserId))
            .transpose()
            .map_err(transport)
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        if self.principal_for_email(email).await?.is_some() {
            return Err(AuthError::Provider(EMAIL_EXISTS.into()));
        }

        let principal_id = UserId::generate();
        let password = password.to_string();
        let password_hash = blocking(move || hash_password(&password)).await?;
        sqlx::query(
            "INSERT INTO accounts (principal_id, email, password_hash, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(principal_id.as_str())
        .bind(email)
        .bind(password_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(transport)?;

        info!(principal_id = %principal_id, "local account created");
        self.session
            .set(AuthSession {
                principal_id: principal_id.clone(),
                email: email.to_string(),
                id_token: None,
            })
            .await;
        Ok(principal_id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let row = sqlx::query("SELECT principal_id, password_hash FROM accounts WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(transport)?
            .ok_or_else(|| AuthError::Provider(EMAIL_NOT_FOUND.into()))?;

        let stored_hash: String = row.try_get("password_hash").map_err(transport)?;
        let password = password.to_string();
        if !blocking(move || verify_password(&password, &stored_hash)).await? {
            return Err(AuthError::Provider(INVALID_PASSWORD.into()));
        }

        let principal_id = UserId(row.try_get("principal_id").map_err(transport)?);
        self.session
            .set(AuthSession {
                principal_id: principal_id.clone(),
                email: email.to_string(),
                id_token: None,
            })
            .await;
        Ok(principal_id)
    }

    async fn sign_out(&self) {
        self.session.clear().await;
    }

    async fn current_principal_id(&self) -> Option<UserId> {
        self.session.current().await.map(|session| session.principal_id)
    }

    async fn delete_current_principal(&self) -> Result<(), AuthError> {
        let session = self.session.require().await?;
        sqlx::query("DELETE FROM accounts WHERE principal_id = ?")
            .bind(session.principal_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(transport)?;
        self.session.clear().await;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        if self.principal_for_email(email).await?.is_none() {
            return Err(AuthError::Provider(EMAIL_NOT_FOUND.into()));
        }
        sqlx::query("INSERT INTO password_resets (email, requested_at) VALUES (?, ?)")
            .bind(email)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(transport)?;
        info!(email, "password reset queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use storage::SqliteStore;

    use super::*;

    async fn provider() -> LocalAuthProvider {
        let store = SqliteStore::connect("sqlite::memory:").await.expect("db");
        LocalAuthProvider::new(store.pool().clone())
            .await
            .expect("provider")
    }

    #[test]
    fn password_hashes_are_salted_argon2id_phc_strings() {
        let first = hash_password("abc12!").expect("hash");
        let second = hash_password("abc12!").expect("hash");
        assert!(first.starts_with("$argon2id$"), "{first}");
        assert_ne!(first, second);
        assert!(!first.contains("abc12!"));

        assert_eq!(verify_password("abc12!", &first), Ok(true));
        assert_eq!(verify_password("abc12!", &second), Ok(true));
        assert_eq!(verify_password("abc12?", &first), Ok(false));
        assert!(verify_password("abc12!", "not-a-phc-string").is_err());
    }

    #[tokio::test]
    async fn stored_credential_is_an_argon2_hash() {
        let auth = provider().await;
        auth.sign_up("asha@example.com", "abc12!").await.expect("sign up");
        let stored: String =
            sqlx::query_scalar("SELECT password_hash FROM accounts WHERE email = ?")
                .bind("asha@example.com")
                .fetch_one(&auth.pool)
                .await
                .expect("row");
        assert!(stored.starts_with("$argon2id$"), "{stored}");
        assert_eq!(verify_password("abc12!", &stored), Ok(true));
    }

    #[tokio::test]
    async fn registers_and_signs_in_with_stored_hash() {
        let auth = provider().await;
        let uid = auth.sign_up("asha@example.com", "abc12!").await.expect("sign up");
        auth.sign_out().await;

        assert_eq!(
            auth.sign_in("asha@example.com", "nope").await,
            Err(AuthError::Provider(INVALID_PASSWORD.into()))
        );
        assert_eq!(auth.sign_in("asha@example.com", "abc12!").await, Ok(uid.clone()));
        assert_eq!(auth.current_principal_id().await, Some(uid));
        assert_eq!(
            auth.sign_up("asha@example.com", "abc12!").await,
            Err(AuthError::Provider(EMAIL_EXISTS.into()))
        );
    }

    #[tokio::test]
    async fn deleting_principal_removes_credential() {
        let auth = provider().await;
        auth.sign_up("a@x", "abc12!").await.expect("sign up");
        auth.delete_current_principal().await.expect("delete");
        assert_eq!(auth.current_principal_id().await, None);
        assert_eq!(
            auth.sign_in("a@x", "abc12!").await,
            Err(AuthError::Provider(EMAIL_NOT_FOUND.into()))
        );
    }

    #[tokio::test]
    async fn password_resets_are_queued_for_known_accounts() {
        let auth = provider().await;
        auth.sign_up("a@x", "abc12!").await.expect("sign up");
        auth.send_password_reset("a@x").await.expect("reset");
        assert!(auth.send_password_reset("b@x").await.is_err());
        assert_eq!(auth.pending_resets().await.expect("resets"), vec!["a@x".to_string()]);
    }
}
