use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{Donation, DonationId, UserId},
    error::GatewayError,
};
use storage::{RecordPath, RemoteStore, DONATIONS, USERS};

use crate::{
    decode, decode_all, encode, fetch_filtered, read_error, write_error, DonationGateway,
    QueryStrategy,
};

const OWNER_FIELD: &str = "userId";

pub struct StoreDonationGateway {
    store: Arc<dyn RemoteStore>,
    strategy: QueryStrategy,
}

impl StoreDonationGateway {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self::with_strategy(store, QueryStrategy::default())
    }

    pub fn with_strategy(store: Arc<dyn RemoteStore>, strategy: QueryStrategy) -> Self {
        Self { store, strategy }
    }

    fn path(id: &DonationId) -> RecordPath {
        RecordPath::new(DONATIONS, id.as_str())
    }

    /// Donations may only be written for a user record that exists.
    async fn ensure_owner(&self, owner: &UserId) -> Result<(), GatewayError> {
        let path = RecordPath::new(USERS, owner.as_str());
        match self.store.read(&path).await.map_err(read_error)? {
            Some(_) => Ok(()),
            None => Err(GatewayError::NotFound(path.to_string())),
        }
    }

    async fn put(&self, donation: &Donation) -> Result<(), GatewayError> {
        self.ensure_owner(&donation.user_id).await?;
        self.store
            .write(&Self::path(&donation.id), encode(donation)?)
            .await
            .map_err(write_error)
    }
}

#[async_trait]
impl DonationGateway for StoreDonationGateway {
    async fn create(&self, donation: &Donation) -> Result<(), GatewayError> {
        self.put(donation).await
    }

    async fn get_by_id(&self, id: &DonationId) -> Result<Option<Donation>, GatewayError> {
        let path = Self::path(id);
        self.store
            .read(&path)
            .await
            .map_err(read_error)?
            .map(|value| decode(&path.to_string(), value))
            .transpose()
    }

    async fn update(&self, donation: &Donation) -> Result<(), GatewayError> {
        self.put(donation).await
    }

    async fn delete(&self, id: &DonationId) -> Result<(), GatewayError> {
        self.store
            .delete(&Self::path(id))
            .await
            .map_err(write_error)
    }

    async fn list_by_user_id(&self, user_id: &UserId) -> Result<Vec<Donation>, GatewayError> {
        let records = fetch_filtered(
            self.store.as_ref(),
            self.strategy,
            DONATIONS,
            OWNER_FIELD,
            &Value::from(user_id.as_str()),
        )
        .await?;
        Ok(decode_all::<Donation>(DONATIONS, records)
            .into_iter()
            .filter(|donation| &donation.user_id == user_id)
            .collect())
    }
}

#[cfg(test)]
#[path = "tests/donation_tests.rs"]
mod tests;
