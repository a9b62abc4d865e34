use std::sync::Arc;

use async_trait::async_trait;
use auth::AuthProvider;
use serde_json::Value;
use shared::{
    domain::{now_millis, BloodGroup, User, UserId, UserPatch},
    error::GatewayError,
};
use storage::{RecordPath, RemoteStore, USERS};
use tracing::{error, info};

use crate::{
    decode, decode_all, encode, fetch_filtered, read_error, write_error, QueryStrategy,
    UserGateway,
};

const DONOR_FIELD: &str = "isDonor";
const BLOOD_GROUP_FIELD: &str = "bloodGroup";
const UPDATED_AT_FIELD: &str = "updatedAt";

pub struct StoreUserGateway {
    store: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthProvider>,
    strategy: QueryStrategy,
}

impl StoreUserGateway {
    pub fn new(store: Arc<dyn RemoteStore>, auth: Arc<dyn AuthProvider>) -> Self {
        Self::with_strategy(store, auth, QueryStrategy::default())
    }

    pub fn with_strategy(
        store: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthProvider>,
        strategy: QueryStrategy,
    ) -> Self {
        Self {
            store,
            auth,
            strategy,
        }
    }

    fn path(id: &UserId) -> RecordPath {
        RecordPath::new(USERS, id.as_str())
    }

    async fn fetch(&self, path: &RecordPath) -> Result<Option<User>, GatewayError> {
        self.store
            .read(path)
            .await
            .map_err(read_error)?
            .map(|value| decode(&path.to_string(), value))
            .transpose()
    }
}

#[async_trait]
impl UserGateway for StoreUserGateway {
    async fn create(&self, user: &User) -> Result<(), GatewayError> {
        self.store
            .write(&Self::path(&user.uid), encode(user)?)
            .await
            .map_err(write_error)
    }

    async fn get_by_id(&self, id: &UserId) -> Result<Option<User>, GatewayError> {
        self.fetch(&Self::path(id)).await
    }

    async fn update(&self, user: &User) -> Result<User, GatewayError> {
        let mut stamped = user.clone();
        stamped.updated_at = now_millis();
        self.store
            .write(&Self::path(&stamped.uid), encode(&stamped)?)
            .await
            .map_err(write_error)?;
        Ok(stamped)
    }

    async fn update_fields(&self, id: &UserId, patch: &UserPatch) -> Result<User, GatewayError> {
        let path = Self::path(id);
        if self.fetch(&path).await?.is_none() {
            return Err(GatewayError::NotFound(path.to_string()));
        }

        let mut fields = patch.to_fields();
        fields.insert(UPDATED_AT_FIELD.into(), Value::from(now_millis()));
        self.store
            .merge(&path, fields)
            .await
            .map_err(write_error)?;

        self.fetch(&path)
            .await?
            .ok_or_else(|| GatewayError::NotFound(path.to_string()))
    }

    async fn delete(&self, id: &UserId) -> Result<(), GatewayError> {
        let removed_credential = match self.auth.current_principal_id().await {
            Some(principal) if &principal == id => {
                self.auth
                    .delete_current_principal()
                    .await
                    .map_err(|err| GatewayError::Auth(err.to_string()))?;
                info!(user_id = %id, "auth credential removed");
                true
            }
            _ => false,
        };

        match self.store.delete(&Self::path(id)).await {
            Ok(()) => Ok(()),
            Err(err) if removed_credential => {
                error!(user_id = %id, error = %err, "credential removed but profile deletion failed");
                Err(GatewayError::PartialDelete {
                    user_id: id.clone(),
                    message: err.to_string(),
                })
            }
            Err(err) => Err(write_error(err)),
        }
    }

    async fn list_donors(&self) -> Result<Vec<User>, GatewayError> {
        let records =
            fetch_filtered(self.store.as_ref(), self.strategy, USERS, DONOR_FIELD, &Value::Bool(true))
                .await?;
        Ok(decode_all::<User>(USERS, records)
            .into_iter()
            .filter(|user| user.is_donor)
            .collect())
    }

    async fn list_donors_by_blood_group(
        &self,
        group: BloodGroup,
    ) -> Result<Vec<User>, GatewayError> {
        let records = fetch_filtered(
            self.store.as_ref(),
            self.strategy,
            USERS,
            BLOOD_GROUP_FIELD,
            &Value::from(group.as_str()),
        )
        .await?;
        Ok(decode_all::<User>(USERS, records)
            .into_iter()
            .filter(|user| user.is_donor && user.blood_group == group)
            .collect())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), GatewayError> {
        self.auth
            .send_password_reset(email)
            .await
            .map_err(|err| GatewayError::Auth(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/user_tests.rs"]
mod tests;
