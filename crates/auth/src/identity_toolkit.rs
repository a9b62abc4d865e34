use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::domain::UserId;
use tracing::debug;
use url::Url;

use crate::{AuthError, AuthProvider, AuthSession, SessionSlot};

pub const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    local_id: String,
    id_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    id_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OobCodeRequest<'a> {
    request_type: &'static str,
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Ignored {}

/// Identity Toolkit REST adapter (`accounts:*` endpoints, keyed by API key).
pub struct IdentityToolkitAuth {
    http: Client,
    base_url: Url,
    api_key: String,
    session: SessionSlot,
}

impl IdentityToolkitAuth {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_base_url(DEFAULT_IDENTITY_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, AuthError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized).map_err(|err| {
            AuthError::Transport(format!("invalid identity url '{base_url}': {err}"))
        })?;
        Ok(Self {
            http: Client::new(),
            base_url,
            api_key: api_key.into(),
            session: SessionSlot::default(),
        })
    }

    async fn call<B, R>(&self, method: &str, body: &B) -> Result<R, AuthError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let mut url = self
            .base_url
            .join(&format!("v1/accounts:{method}"))
            .map_err(|err| AuthError::Transport(err.to_string()))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        debug!(method, "identity toolkit request");

        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| AuthError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|err| AuthError::Transport(err.to_string()));
        }

        let raw = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorEnvelope>(&raw) {
            Ok(envelope) => Err(AuthError::Provider(envelope.error.message)),
            Err(_) => Err(AuthError::Transport(format!("{status}: {raw}"))),
        }
    }

    async fn password_call(
        &self,
        method: &str,
        email: &str,
        password: &str,
    ) -> Result<UserId, AuthError> {
        let response: PasswordResponse = self
            .call(
                method,
                &PasswordRequest {
                    email,
                    password,
                    return_secure_token: true,
                },
            )
            .await?;
        let principal_id = UserId(response.local_id);
        self.session
            .set(AuthSession {
                principal_id: principal_id.clone(),
                email: email.to_string(),
                id_token: Some(response.id_token),
            })
            .await;
        Ok(principal_id)
    }
}

#[async_trait]
impl AuthProvider for IdentityToolkitAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        self.password_call("signUp", email, password).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        self.password_call("signInWithPassword", email, password).await
    }

    async fn sign_out(&self) {
        self.session.clear().await;
    }

    async fn current_principal_id(&self) -> Option<UserId> {
        self.session.current().await.map(|session| session.principal_id)
    }

    async fn delete_current_principal(&self) -> Result<(), AuthError> {
        let session = self.session.require().await?;
        let id_token = session.id_token.ok_or(AuthError::NotSignedIn)?;
        let _: Ignored = self
            .call("delete", &DeleteRequest { id_token: &id_token })
            .await?;
        self.session.clear().await;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let _: Ignored = self
            .call(
                "sendOobCode",
                &OobCodeRequest {
                    request_type: "PASSWORD_RESET",
                    email,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/identity_toolkit_tests.rs"]
mod tests;
