use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use shared::domain::UserId;
use tokio::sync::Mutex;

use crate::{
    AuthError, AuthProvider, AuthSession, SessionSlot, EMAIL_EXISTS, EMAIL_NOT_FOUND,
    INVALID_PASSWORD,
};

struct Account {
    principal_id: UserId,
    password: String,
}

/// In-process provider with switchable failures for credential deletion and
/// password-reset delivery.
#[derive(Default)]
pub struct MemoryAuthProvider {
    accounts: Mutex<HashMap<String, Account>>,
    session: SessionSlot,
    sent_resets: Mutex<Vec<String>>,
    fail_delete: AtomicBool,
    fail_reset: AtomicBool,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a credential under a fixed principal id without signing in.
    pub async fn insert_account(&self, email: &str, password: &str, principal_id: UserId) {
        self.accounts.lock().await.insert(
            email.to_string(),
            Account {
                principal_id,
                password: password.to_string(),
            },
        );
    }

    pub async fn has_account(&self, principal_id: &UserId) -> bool {
        self.accounts
            .lock()
            .await
            .values()
            .any(|account| &account.principal_id == principal_id)
    }

    pub async fn sent_resets(&self) -> Vec<String> {
        self.sent_resets.lock().await.clone()
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reset(&self, fail: bool) {
        self.fail_reset.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let principal_id = {
            let mut accounts = self.accounts.lock().await;
            if accounts.contains_key(email) {
                return Err(AuthError::Provider(EMAIL_EXISTS.into()));
            }
            let principal_id = UserId::generate();
            accounts.insert(
                email.to_string(),
                Account {
                    principal_id: principal_id.clone(),
                    password: password.to_string(),
                },
            );
            principal_id
        };
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
        let principal_id = {
            let accounts = self.accounts.lock().await;
            let account = accounts
                .get(email)
                .ok_or_else(|| AuthError::Provider(EMAIL_NOT_FOUND.into()))?;
            if account.password != password {
                return Err(AuthError::Provider(INVALID_PASSWORD.into()));
            }
            account.principal_id.clone()
        };
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
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AuthError::Provider("CREDENTIAL_TOO_OLD_LOGIN_AGAIN".into()));
        }
        self.accounts.lock().await.remove(&session.email);
        self.session.clear().await;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        if self.fail_reset.load(Ordering::SeqCst) {
            return Err(AuthError::Transport("injected reset failure".into()));
        }
        if !self.accounts.lock().await.contains_key(email) {
            return Err(AuthError::Provider(EMAIL_NOT_FOUND.into()));
        }
        self.sent_resets.lock().await.push(email.to_string());
        Ok(())
    }
}
