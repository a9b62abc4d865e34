use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::{check_segment, RecordPath, RemoteStore, StoreError};

/// Adapter for a realtime-database REST endpoint: every node is reachable at
/// `<base>/<path>.json`, and equality queries use `orderBy`/`equalTo`.
pub struct RtdbStore {
    http: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl RtdbStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self, StoreError> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized).map_err(|err| {
            StoreError::Transport(format!("invalid database url '{base_url}': {err}"))
        })?;
        Ok(Self {
            http,
            base_url,
            auth_token: None,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// `<base>/<collection>.json` or `<base>/<collection>/<key>.json`, with
    /// each segment percent-encoded on its own.
    fn node_url(&self, collection: &str, key: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                StoreError::Transport(format!("database url '{}' cannot hold paths", self.base_url))
            })?;
            segments.pop_if_empty();
            match key {
                Some(key) => segments.push(collection).push(&format!("{key}.json")),
                None => segments.push(&format!("{collection}.json")),
            };
        }
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    fn record_url(&self, path: &RecordPath) -> Result<Url, StoreError> {
        path.check()?;
        self.node_url(path.collection(), Some(path.key()))
    }

    fn collection_url(&self, collection: &str) -> Result<Url, StoreError> {
        check_segment(collection)?;
        self.node_url(collection, None)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, path = url.path(), "rtdb request");
        self.http.request(method, url)
    }

    async fn fetch_collection(&self, url: Url) -> Result<Vec<Value>, StoreError> {
        let body = read_json(send(self.request(Method::GET, url)).await?).await?;
        Ok(collection_values(body))
    }
}

async fn send(request: RequestBuilder) -> Result<Response, StoreError> {
    let response = request
        .send()
        .await
        .map_err(|err| StoreError::Transport(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(StoreError::PermissionDenied(body))
    } else {
        Err(StoreError::Transport(format!("{status}: {body}")))
    }
}

async fn read_json(response: Response) -> Result<Value, StoreError> {
    response
        .json::<Value>()
        .await
        .map_err(|err| StoreError::Transport(err.to_string()))
}

/// Collections come back as an object keyed by record key, or as an array
/// with holes when every key is numeric.
fn collection_values(body: Value) -> Vec<Value> {
    match body {
        Value::Object(records) => records.into_iter().map(|(_, record)| record).collect(),
        Value::Array(records) => records.into_iter().filter(|record| !record.is_null()).collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl RemoteStore for RtdbStore {
    async fn write(&self, path: &RecordPath, value: Value) -> Result<(), StoreError> {
        let url = self.record_url(path)?;
        send(self.request(Method::PUT, url).json(&value)).await?;
        Ok(())
    }

    async fn merge(&self, path: &RecordPath, fields: Map<String, Value>) -> Result<(), StoreError> {
        let url = self.record_url(path)?;
        send(self.request(Method::PATCH, url).json(&fields)).await?;
        Ok(())
    }

    async fn read(&self, path: &RecordPath) -> Result<Option<Value>, StoreError> {
        let url = self.record_url(path)?;
        let body = read_json(send(self.request(Method::GET, url)).await?).await?;
        Ok((!body.is_null()).then_some(body))
    }

    async fn delete(&self, path: &RecordPath) -> Result<(), StoreError> {
        let url = self.record_url(path)?;
        send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StoreError> {
        let mut url = self.collection_url(collection)?;
        url.query_pairs_mut()
            .append_pair("orderBy", &format!("\"{field}\""))
            .append_pair("equalTo", &value.to_string());
        self.fetch_collection(url).await
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let url = self.collection_url(collection)?;
        self.fetch_collection(url).await
    }
}
