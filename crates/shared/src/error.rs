use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RemoteRead,
    RemoteWrite,
    Auth,
    NotFound,
    NotOwner,
    PartialDelete,
}

/// Failure of a gateway operation. Every variant carries the message of the
/// underlying transport or provider failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("remote read failed: {0}")]
    RemoteRead(String),
    #[error("remote write failed: {0}")]
    RemoteWrite(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("no record at {0}")]
    NotFound(String),
    #[error("{path} does not belong to {owner}")]
    NotOwner { path: String, owner: UserId },
    #[error("credential for {user_id} was removed but the profile was not: {message}")]
    PartialDelete { user_id: UserId, message: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::RemoteRead(_) => ErrorKind::RemoteRead,
            GatewayError::RemoteWrite(_) => ErrorKind::RemoteWrite,
            GatewayError::Auth(_) => ErrorKind::Auth,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::NotOwner { .. } => ErrorKind::NotOwner,
            GatewayError::PartialDelete { .. } => ErrorKind::PartialDelete,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown blood group '{0}'")]
pub struct UnknownBloodGroup(pub String);
