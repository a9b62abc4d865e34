//! Identity-provider boundary: sign-up/sign-in, the current principal,
//! credential deletion and password-reset delivery.

use async_trait::async_trait;
use shared::domain::UserId;
use thiserror::Error;
use tokio::sync::RwLock;

mod identity_toolkit;
mod local;
mod memory;

pub use identity_toolkit::IdentityToolkitAuth;
pub use local::LocalAuthProvider;
pub use memory::MemoryAuthProvider;

pub const EMAIL_EXISTS: &str = "EMAIL_EXISTS";
pub const EMAIL_NOT_FOUND: &str = "EMAIL_NOT_FOUND";
pub const INVALID_PASSWORD: &str = "INVALID_PASSWORD";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Rejection reported by the provider, message kept verbatim.
    #[error("{0}")]
    Provider(String),
    #[error("no signed-in user")]
    NotSignedIn,
    #[error("auth transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub principal_id: UserId,
    pub email: String,
    pub id_token: Option<String>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Creates a credential and signs it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<UserId, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<UserId, AuthError>;
    async fn sign_out(&self);
    async fn current_principal_id(&self) -> Option<UserId>;
    /// Removes the signed-in credential and ends the session.
    async fn delete_current_principal(&self) -> Result<(), AuthError>;
    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;
}

/// Signed-in session shared by the provider adapters.
#[derive(Default)]
pub(crate) struct SessionSlot {
    session: RwLock<Option<AuthSession>>,
}

impl SessionSlot {
    pub(crate) async fn set(&self, session: AuthSession) {
        *self.session.write().await = Some(session);
    }

    pub(crate) async fn clear(&self) {
        *self.session.write().await = None;
    }

    pub(crate) async fn current(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub(crate) async fn require(&self) -> Result<AuthSession, AuthError> {
        self.current().await.ok_or(AuthError::NotSignedIn)
    }
}
