//! Entity gateways: user and donation operations expressed as reads and
//! writes against an injected [`RemoteStore`] and [`auth::AuthProvider`].

use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use shared::{
    domain::{BloodGroup, Donation, DonationId, User, UserId, UserPatch},
    error::GatewayError,
};
use storage::{RemoteStore, StoreError};
use thiserror::Error;
use tracing::warn;

mod donation;
mod user;

pub use donation::StoreDonationGateway;
pub use user::StoreUserGateway;

/// How filtered lists are fetched. Both strategies return the same records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStrategy {
    /// Server-side equality query on one field, remaining predicates applied locally.
    #[default]
    Indexed,
    /// Full collection scan with every predicate applied locally.
    ScanAndFilter,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown query strategy '{0}' (expected 'indexed' or 'scan_and_filter')")]
pub struct UnknownQueryStrategy(pub String);

impl FromStr for QueryStrategy {
    type Err = UnknownQueryStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "indexed" => Ok(QueryStrategy::Indexed),
            "scan_and_filter" | "scan" => Ok(QueryStrategy::ScanAndFilter),
            _ => Err(UnknownQueryStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for QueryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStrategy::Indexed => f.write_str("indexed"),
            QueryStrategy::ScanAndFilter => f.write_str("scan_and_filter"),
        }
    }
}

#[async_trait]
pub trait UserGateway: Send + Sync {
    async fn create(&self, user: &User) -> Result<(), GatewayError>;
    async fn get_by_id(&self, id: &UserId) -> Result<Option<User>, GatewayError>;
    /// Replaces the stored record and returns it with a fresh `updated_at`.
    async fn update(&self, user: &User) -> Result<User, GatewayError>;
    /// Writes only the patched fields and returns the stored result.
    async fn update_fields(&self, id: &UserId, patch: &UserPatch) -> Result<User, GatewayError>;
    async fn delete(&self, id: &UserId) -> Result<(), GatewayError>;
    async fn list_donors(&self) -> Result<Vec<User>, GatewayError>;
    async fn list_donors_by_blood_group(&self, group: BloodGroup)
        -> Result<Vec<User>, GatewayError>;
    async fn send_password_reset(&self, email: &str) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait DonationGateway: Send + Sync {
    /// Fails with [`GatewayError::NotFound`] when `donation.user_id` has no
    /// user record. `update` checks the same.
    async fn create(&self, donation: &Donation) -> Result<(), GatewayError>;
    async fn get_by_id(&self, id: &DonationId) -> Result<Option<Donation>, GatewayError>;
    async fn update(&self, donation: &Donation) -> Result<(), GatewayError>;
    async fn delete(&self, id: &DonationId) -> Result<(), GatewayError>;
    async fn list_by_user_id(&self, user_id: &UserId) -> Result<Vec<Donation>, GatewayError>;
}

pub(crate) fn read_error(err: StoreError) -> GatewayError {
    GatewayError::RemoteRead(err.to_string())
}

pub(crate) fn write_error(err: StoreError) -> GatewayError {
    GatewayError::RemoteWrite(err.to_string())
}

pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(record).map_err(|err| GatewayError::RemoteWrite(err.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value)
        .map_err(|err| GatewayError::RemoteRead(format!("malformed record at {path}: {err}")))
}

/// Decodes a fetched collection, skipping records that do not parse.
pub(crate) fn decode_all<T: DeserializeOwned>(collection: &str, values: Vec<Value>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(collection, error = %err, "skipping malformed record");
                None
            }
        })
        .collect()
}

pub(crate) async fn fetch_filtered(
    store: &dyn RemoteStore,
    strategy: QueryStrategy,
    collection: &str,
    field: &str,
    value: &Value,
) -> Result<Vec<Value>, GatewayError> {
    let records = match strategy {
        QueryStrategy::Indexed => store.query_eq(collection, field, value).await,
        QueryStrategy::ScanAndFilter => store.scan(collection).await.map(|records| {
            records
                .into_iter()
                .filter(|record| record.get(field) == Some(value))
                .collect()
        }),
    };
    records.map_err(read_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_strategy_names() {
        assert_eq!("indexed".parse::<QueryStrategy>(), Ok(QueryStrategy::Indexed));
        assert_eq!("Scan-And-Filter".parse::<QueryStrategy>(), Ok(QueryStrategy::ScanAndFilter));
        assert!("fulltext".parse::<QueryStrategy>().is_err());
        assert_eq!(QueryStrategy::ScanAndFilter.to_string(), "scan_and_filter");
    }
}
