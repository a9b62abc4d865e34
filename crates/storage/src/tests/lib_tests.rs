use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    routing::any,
    Json, Router,
};
use serde_json::json;
use tokio::{net::TcpListener, sync::Mutex};

use super::*;

fn users(key: &str) -> RecordPath {
    RecordPath::new(USERS, key)
}

async fn seed(store: &dyn RemoteStore) {
    store
        .write(
            &users("u1"),
            json!({"uid": "u1", "bloodGroup": "O+", "isDonor": true}),
        )
        .await
        .expect("write u1");
    store
        .write(
            &users("u2"),
            json!({"uid": "u2", "bloodGroup": "A-", "isDonor": true}),
        )
        .await
        .expect("write u2");
    store
        .write(
            &users("u3"),
            json!({"uid": "u3", "bloodGroup": "O+", "isDonor": false}),
        )
        .await
        .expect("write u3");
}

async fn assert_store_contract(store: &dyn RemoteStore) {
    seed(store).await;

    let read = store.read(&users("u1")).await.expect("read");
    assert_eq!(
        read,
        Some(json!({"uid": "u1", "bloodGroup": "O+", "isDonor": true}))
    );
    assert_eq!(store.read(&users("missing")).await.expect("read"), None);

    let donors = store
        .query_eq(USERS, "isDonor", &json!(true))
        .await
        .expect("query");
    let uids: Vec<_> = donors.iter().map(|d| d["uid"].clone()).collect();
    assert_eq!(uids, vec![json!("u1"), json!("u2")]);

    let o_positive = store
        .query_eq(USERS, "bloodGroup", &json!("O+"))
        .await
        .expect("query");
    assert_eq!(o_positive.len(), 2);

    let mut fields = Map::new();
    fields.insert("location".into(), json!("Pune"));
    fields.insert("isDonor".into(), json!(false));
    store.merge(&users("u1"), fields).await.expect("merge");
    let merged = store
        .read(&users("u1"))
        .await
        .expect("read")
        .expect("present");
    assert_eq!(merged["location"], json!("Pune"));
    assert_eq!(merged["isDonor"], json!(false));
    assert_eq!(merged["bloodGroup"], json!("O+"));

    store.delete(&users("u2")).await.expect("delete");
    assert_eq!(store.read(&users("u2")).await.expect("read"), None);
    assert_eq!(store.scan(USERS).await.expect("scan").len(), 2);
    assert!(store.scan(DONATIONS).await.expect("scan").is_empty());
}

#[test]
fn merge_fields_removes_null_values() {
    let mut fields = Map::new();
    fields.insert("location".into(), Value::Null);
    fields.insert("age".into(), json!(40));
    let merged = merge_fields(Some(json!({"location": "Pune", "uid": "u1"})), fields);
    assert_eq!(merged, json!({"uid": "u1", "age": 40}));
}

#[test]
fn record_path_displays_collection_and_key() {
    assert_eq!(RecordPath::new(DONATIONS, "d1").to_string(), "donations/d1");
}

#[test]
fn record_path_rejects_keys_that_leave_their_node() {
    for key in ["", "../users", "a/b", "a#b", "a.b", "$root", "[0]", "tab\there"] {
        assert_eq!(
            users(key).check(),
            Err(StoreError::InvalidKey(format!("users/{key}"))),
            "{key:?}"
        );
    }
    assert_eq!(
        RecordPath::new("", "u1").check(),
        Err(StoreError::InvalidKey(String::new()))
    );
    for key in ["u1", "x?shallow=true", "ana maria", "d-1_2", "9f1c2e"] {
        assert_eq!(users(key).check(), Ok(()), "{key:?}");
    }
}

async fn assert_rejects_invalid_keys(store: &dyn RemoteStore) {
    seed(store).await;
    for key in ["", "..", "../donations", "a#b"] {
        assert!(matches!(
            store.delete(&users(key)).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.write(&users(key), json!({"uid": key})).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.read(&users(key)).await,
            Err(StoreError::InvalidKey(_))
        ));
    }
    assert!(matches!(
        store.scan("users/u1").await,
        Err(StoreError::InvalidKey(_))
    ));
    assert_eq!(store.scan(USERS).await.expect("scan").len(), 3);
}

#[tokio::test]
async fn memory_store_honours_store_contract() {
    let store = MemoryStore::new();
    assert_store_contract(&store).await;
}

#[tokio::test]
async fn memory_store_injects_failures_and_counts_calls() {
    let store = MemoryStore::new();
    seed(&store).await;
    store.set_fail_reads(true);
    assert!(matches!(
        store.read(&users("u1")).await,
        Err(StoreError::Transport(_))
    ));
    store.set_fail_reads(false);
    store.set_fail_writes(true);
    assert!(store.delete(&users("u1")).await.is_err());
    store.set_fail_writes(false);
    assert!(store.read(&users("u1")).await.expect("read").is_some());

    let stats = store.stats();
    assert_eq!(stats.reads, 2);
    assert_eq!(stats.writes, 4);
    assert_eq!(stats.queries, 0);
}

#[tokio::test]
async fn memory_store_rejects_invalid_keys() {
    assert_rejects_invalid_keys(&MemoryStore::new()).await;
}

#[tokio::test]
async fn sqlite_store_honours_store_contract() {
    let store = SqliteStore::connect("sqlite::memory:").await.expect("db");
    store.health_check().await.expect("health check");
    assert_store_contract(&store).await;
}

#[tokio::test]
async fn sqlite_store_creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("bloodbank_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("records.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let store = SqliteStore::connect(&database_url).await.expect("db");
    store
        .write(&users("u1"), json!({"uid": "u1"}))
        .await
        .expect("write");
    drop(store);

    let reopened = SqliteStore::connect(&database_url).await.expect("db");
    assert!(reopened.read(&users("u1")).await.expect("read").is_some());
    assert!(db_path.exists(), "database file should exist: {}", db_path.display());

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[derive(Clone, Default)]
struct FakeRtdb {
    nodes: Arc<Mutex<BTreeMap<String, BTreeMap<String, Value>>>>,
    requests: Arc<Mutex<Vec<String>>>,
    required_token: Option<String>,
}

async fn handle_rtdb(
    State(state): State<FakeRtdb>,
    method: Method,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    state.requests.lock().await.push(format!("{method} {path}"));
    if let Some(token) = &state.required_token {
        if params.get("auth") != Some(token) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Permission denied"})),
            );
        }
    }

    let node = path.trim_end_matches(".json").to_string();
    let mut nodes = state.nodes.lock().await;
    let Some((collection, key)) = node.split_once('/') else {
        let records = nodes.get(&node).cloned().unwrap_or_default();
        let filter = match (params.get("orderBy"), params.get("equalTo")) {
            (Some(order_by), Some(equal_to)) => {
                let field = order_by.trim_matches('"').to_string();
                let value: Value = serde_json::from_str(equal_to).unwrap_or(Value::Null);
                Some((field, value))
            }
            _ => None,
        };
        let selected: Map<String, Value> = records
            .into_iter()
            .filter(|(_, record)| match &filter {
                Some((field, value)) => record.get(field) == Some(value),
                None => true,
            })
            .collect();
        if selected.is_empty() {
            return (StatusCode::OK, Json(Value::Null));
        }
        return (StatusCode::OK, Json(Value::Object(selected)));
    };

    let collection = nodes.entry(collection.to_string()).or_default();
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    match method {
        Method::GET => (
            StatusCode::OK,
            Json(collection.get(key).cloned().unwrap_or(Value::Null)),
        ),
        Method::PUT => {
            collection.insert(key.to_string(), payload.clone());
            (StatusCode::OK, Json(payload))
        }
        Method::PATCH => {
            let fields = match payload.clone() {
                Value::Object(fields) => fields,
                _ => Map::new(),
            };
            let merged = merge_fields(collection.remove(key), fields);
            collection.insert(key.to_string(), merged);
            (StatusCode::OK, Json(payload))
        }
        Method::DELETE => {
            collection.remove(key);
            (StatusCode::OK, Json(Value::Null))
        }
        _ => (StatusCode::METHOD_NOT_ALLOWED, Json(Value::Null)),
    }
}

async fn spawn_fake_rtdb(required_token: Option<&str>) -> String {
    spawn_fake_rtdb_with(FakeRtdb {
        required_token: required_token.map(str::to_string),
        ..FakeRtdb::default()
    })
    .await
}

async fn spawn_fake_rtdb_with(state: FakeRtdb) -> String {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new()
        .route("/*path", any(handle_rtdb))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn rtdb_store_honours_store_contract() {
    let base_url = spawn_fake_rtdb(None).await;
    let store = RtdbStore::new(&base_url).expect("store");
    assert_store_contract(&store).await;
}

#[tokio::test]
async fn rtdb_store_sends_auth_token_and_maps_permission_errors() {
    let base_url = spawn_fake_rtdb(Some("secret")).await;

    let anonymous = RtdbStore::new(&base_url).expect("store");
    let err = anonymous
        .read(&users("u1"))
        .await
        .expect_err("should be rejected");
    assert!(matches!(err, StoreError::PermissionDenied(_)));

    let authorised = RtdbStore::new(&base_url)
        .expect("store")
        .with_auth_token("secret");
    authorised
        .write(&users("u1"), json!({"uid": "u1"}))
        .await
        .expect("write");
    assert!(authorised.read(&users("u1")).await.expect("read").is_some());
}

#[tokio::test]
async fn rtdb_store_keeps_keys_inside_their_collection() {
    let fake = FakeRtdb::default();
    let base_url = spawn_fake_rtdb_with(fake.clone()).await;
    let store = RtdbStore::new(&base_url).expect("store");
    assert_rejects_invalid_keys(&store).await;

    let seen = fake.requests.lock().await.clone();
    assert!(
        seen.iter().all(|request| !request.starts_with("DELETE")),
        "{seen:?}"
    );
    assert_eq!(store.scan(DONATIONS).await.expect("scan"), Vec::<Value>::new());

    store
        .write(&users("x?shallow=true"), json!({"uid": "x?shallow=true"}))
        .await
        .expect("write");
    store
        .delete(&users("x?shallow=true"))
        .await
        .expect("delete");
    let seen = fake.requests.lock().await.clone();
    assert_eq!(
        seen.last().map(String::as_str),
        Some("DELETE users/x?shallow=true.json")
    );
    assert_eq!(store.scan(USERS).await.expect("scan").len(), 3);
}

#[test]
fn rtdb_store_rejects_invalid_base_url() {
    assert!(RtdbStore::new("not a url").is_err());
}

#[test]
fn shared_domain_records_round_trip_through_documents() {
    use shared::domain::{BloodGroup, User, UserId};

    let user = User::new(UserId::from("u1"), "Asha", "a@x", "1", BloodGroup::OPositive);
    let value = serde_json::to_value(&user).expect("encode");
    assert!(field_matches(&value, "bloodGroup", &json!("O+")));
    assert!(field_matches(&value, "isDonor", &json!(false)));
}
