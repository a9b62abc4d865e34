use std::sync::Arc;

use auth::AuthProvider;
use gateway::UserGateway;
use shared::{
    domain::{BloodGroup, User, UserId},
    error::GatewayError,
    validation::{validate_password, PasswordRuleError},
};
use thiserror::Error;
use tracing::{error, info};

use crate::{Observable, Operation, OperationScope};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error(transparent)]
    WeakPassword(#[from] PasswordRuleError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("profile for {user_id} was not created ({profile}) and its credential could not be removed: {cleanup}")]
    OrphanedCredential {
        user_id: UserId,
        profile: GatewayError,
        cleanup: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub blood_group: BloodGroup,
    pub location: Option<String>,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    pub fn check_password(&self) -> Result<(), SessionError> {
        validate_password(&self.password)?;
        if self.password != self.confirm_password {
            return Err(SessionError::PasswordMismatch);
        }
        Ok(())
    }
}

/// Sign-in, registration and sign-out. `principal` holds the signed-in
/// user's id.
pub struct SessionController {
    auth: Arc<dyn AuthProvider>,
    users: Arc<dyn UserGateway>,
    principal: Arc<Observable<Option<UserId>>>,
    scope: OperationScope,
}

impl SessionController {
    pub fn new(auth: Arc<dyn AuthProvider>, users: Arc<dyn UserGateway>) -> Self {
        Self {
            auth,
            users,
            principal: Arc::new(Observable::default()),
            scope: OperationScope::new(),
        }
    }

    pub fn loading(&self) -> &Observable<bool> {
        self.scope.loading()
    }

    pub fn error(&self) -> &Observable<Option<String>> {
        self.scope.error()
    }

    pub fn principal(&self) -> &Observable<Option<UserId>> {
        &self.principal
    }

    pub fn sign_in(&self, email: impl Into<String>, password: impl Into<String>) -> Operation {
        let (email, password) = (email.into(), password.into());
        let auth = Arc::clone(&self.auth);
        let principal = Arc::clone(&self.principal);
        self.scope.launch(
            "sign_in",
            async move {
                auth.sign_in(&email, &password)
                    .await
                    .map_err(|err| SessionError::Authentication(err.to_string()))
            },
            move |uid| principal.set(Some(uid)),
        )
    }

    /// Creates the credential, then the donor profile keyed by the new
    /// principal id. If the profile cannot be written the new credential is
    /// removed again.
    pub fn register(&self, registration: Registration) -> Operation {
        let auth = Arc::clone(&self.auth);
        let users = Arc::clone(&self.users);
        let principal = Arc::clone(&self.principal);
        self.scope.launch(
            "register",
            async move {
                registration.check_password()?;
                let uid = auth
                    .sign_up(&registration.email, &registration.password)
                    .await
                    .map_err(|err| SessionError::Authentication(err.to_string()))?;

                let mut user = User::new(
                    uid.clone(),
                    registration.full_name,
                    registration.email,
                    registration.phone,
                    registration.blood_group,
                )
                .with_donor(true);
                user.location = registration.location;
                if let Err(profile) = users.create(&user).await {
                    return Err(discard_credential(auth.as_ref(), uid, profile).await);
                }
                info!(user_id = %uid, "registered donor");
                Ok::<_, SessionError>(uid)
            },
            move |uid| principal.set(Some(uid)),
        )
    }

    pub fn sign_out(&self) -> Operation {
        let auth = Arc::clone(&self.auth);
        let principal = Arc::clone(&self.principal);
        self.scope.launch(
            "sign_out",
            async move {
                auth.sign_out().await;
                Ok::<_, SessionError>(())
            },
            move |()| principal.set(None),
        )
    }

    pub fn clear_error(&self) {
        self.scope.clear_error();
    }

    pub fn shutdown(&self) {
        self.scope.shutdown();
    }
}

/// Undoes a sign-up whose profile write failed. The provider session is
/// closed either way.
async fn discard_credential(
    auth: &dyn AuthProvider,
    user_id: UserId,
    profile: GatewayError,
) -> SessionError {
    error!(user_id = %user_id, error = %profile, "profile creation failed after sign-up");
    match auth.delete_current_principal().await {
        Ok(()) => {
            info!(user_id = %user_id, "new credential removed");
            SessionError::Gateway(profile)
        }
        Err(cleanup) => {
            error!(user_id = %user_id, error = %cleanup, "new credential could not be removed");
            auth.sign_out().await;
            SessionError::OrphanedCredential {
                user_id,
                profile,
                cleanup: cleanup.to_string(),
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/session_controller_tests.rs"]
mod tests;
