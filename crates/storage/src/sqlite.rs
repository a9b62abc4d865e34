use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};

use crate::{check_segment, merge_fields, RecordPath, RemoteStore, StoreError};

const MEMORY_URL: &str = "sqlite::memory:";

/// Document store on a single SQLite table. Equality queries run through
/// `json_extract` so they are answered by the database, not by a scan.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(transport)?
            .create_if_missing(true);
        // Every connection to `sqlite::memory:` opens its own database, so the
        // pool must hold exactly one connection for its whole life.
        let pool_options = if database_url.starts_with(MEMORY_URL) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(transport)?;

        let store = Self { pool };
        store.ensure_records_table().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn ensure_records_table(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                key        TEXT NOT NULL,
                body       TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (collection, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(transport)?;
        Ok(())
    }
}

fn transport(err: sqlx::Error) -> StoreError {
    StoreError::Transport(err.to_string())
}

fn decode_body(path: &str, body: &str) -> Result<Value, StoreError> {
    serde_json::from_str(body).map_err(|err| StoreError::Malformed {
        path: path.to_string(),
        message: err.to_string(),
    })
}

fn decode_rows(
    collection: &str,
    rows: Vec<sqlx::sqlite::SqliteRow>,
) -> Result<Vec<Value>, StoreError> {
    rows.into_iter()
        .map(|row| {
            let key: String = row.try_get("key").map_err(transport)?;
            let body: String = row.try_get("body").map_err(transport)?;
            decode_body(&format!("{collection}/{key}"), &body)
        })
        .collect()
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn write(&self, path: &RecordPath, value: Value) -> Result<(), StoreError> {
        path.check()?;
        sqlx::query(
            "INSERT INTO records (collection, key, body) VALUES (?, ?, ?)
             ON CONFLICT(collection, key) DO UPDATE SET body=excluded.body, updated_at=CURRENT_TIMESTAMP",
        )
        .bind(path.collection())
        .bind(path.key())
        .bind(value.to_string())
        .execute(&self.pool)
        .await
        .map_err(transport)?;
        Ok(())
    }

    async fn merge(&self, path: &RecordPath, fields: Map<String, Value>) -> Result<(), StoreError> {
        path.check()?;
        let mut tx = self.pool.begin().await.map_err(transport)?;
        let existing = sqlx::query("SELECT body FROM records WHERE collection = ? AND key = ?")
            .bind(path.collection())
            .bind(path.key())
            .fetch_optional(&mut *tx)
            .await
            .map_err(transport)?
            .map(|row| {
                let body: String = row.try_get("body").map_err(transport)?;
                decode_body(&path.to_string(), &body)
            })
            .transpose()?;

        let merged = merge_fields(existing, fields);
        sqlx::query(
            "INSERT INTO records (collection, key, body) VALUES (?, ?, ?)
             ON CONFLICT(collection, key) DO UPDATE SET body=excluded.body, updated_at=CURRENT_TIMESTAMP",
        )
        .bind(path.collection())
        .bind(path.key())
        .bind(merged.to_string())
        .execute(&mut *tx)
        .await
        .map_err(transport)?;
        tx.commit().await.map_err(transport)?;
        Ok(())
    }

    async fn read(&self, path: &RecordPath) -> Result<Option<Value>, StoreError> {
        path.check()?;
        let row = sqlx::query("SELECT body FROM records WHERE collection = ? AND key = ?")
            .bind(path.collection())
            .bind(path.key())
            .fetch_optional(&self.pool)
            .await
            .map_err(transport)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row.try_get("body").map_err(transport)?;
        decode_body(&path.to_string(), &body).map(Some)
    }

    async fn delete(&self, path: &RecordPath) -> Result<(), StoreError> {
        path.check()?;
        sqlx::query("DELETE FROM records WHERE collection = ? AND key = ?")
            .bind(path.collection())
            .bind(path.key())
            .execute(&self.pool)
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StoreError> {
        check_segment(collection)?;
        let rows = sqlx::query(
            "SELECT key, body FROM records
             WHERE collection = ? AND json_extract(body, ?) = json_extract(?, '$')
             ORDER BY key",
        )
        .bind(collection)
        .bind(format!("$.{field}"))
        .bind(value.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(transport)?;
        decode_rows(collection, rows)
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        check_segment(collection)?;
        let rows = sqlx::query("SELECT key, body FROM records WHERE collection = ? ORDER BY key")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(transport)?;
        decode_rows(collection, rows)
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<(), StoreError> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).map_err(|err| {
        StoreError::Transport(format!(
            "failed to create parent directory '{}' for database url '{database_url}': {err}",
            parent.display()
        ))
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with(MEMORY_URL) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
