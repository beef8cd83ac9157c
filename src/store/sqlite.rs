//! SQLite-backed store.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, types::Type, Connection, OptionalExtension, Row};
use serde_json::{Map, Value as Json};
use uuid::Uuid;

use crate::core::{
    api_key::ApiKey,
    request::{RequestFilter, StoredRequest},
    user::User,
};

use super::{ApiKeyStore, RequestStore, UserStore};

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS users (
      id TEXT PRIMARY KEY,
      email TEXT NOT NULL UNIQUE,
      first_name TEXT NOT NULL,
      last_name TEXT NOT NULL,
      password_hash TEXT NOT NULL,
      is_active INTEGER NOT NULL DEFAULT 1,
      is_email_verified INTEGER NOT NULL DEFAULT 0,
      created_at_ms INTEGER NOT NULL,
      updated_at_ms INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS api_keys (
      id TEXT PRIMARY KEY,
      key TEXT NOT NULL UNIQUE,
      name TEXT NOT NULL,
      description TEXT NULL,
      is_active INTEGER NOT NULL DEFAULT 1,
      expires_at_ms INTEGER NULL,
      usage_count INTEGER NOT NULL DEFAULT 0,
      last_used_at_ms INTEGER NULL,
      last_used_ip TEXT NULL,
      permissions_json TEXT NOT NULL DEFAULT '[]',
      user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
      created_at_ms INTEGER NOT NULL,
      updated_at_ms INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS requests (
      id TEXT PRIMARY KEY,
      api_key_id TEXT NOT NULL REFERENCES api_keys(id) ON DELETE CASCADE,
      api_id TEXT NOT NULL,
      endpoint TEXT NOT NULL,
      method TEXT NOT NULL,
      headers_json TEXT NOT NULL,
      query_params_json TEXT NULL,
      request_body TEXT NULL,
      response_headers_json TEXT NOT NULL,
      status_code INTEGER NOT NULL,
      response_body TEXT NULL,
      duration_ms INTEGER NOT NULL,
      user_agent TEXT NULL,
      ip_address TEXT NULL,
      timestamp_ms INTEGER NOT NULL,
      metadata_json TEXT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_api_keys_user ON api_keys(user_id);
    CREATE INDEX IF NOT EXISTS idx_requests_api_key ON requests(api_key_id);
    CREATE INDEX IF NOT EXISTS idx_requests_api_endpoint ON requests(api_id, endpoint);
    CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests(timestamp_ms);
"#;

const USER_COLUMNS: &str = "id, email, first_name, last_name, password_hash, is_active, \
     is_email_verified, created_at_ms, updated_at_ms";

const KEY_COLUMNS: &str = "id, key, name, description, is_active, expires_at_ms, usage_count, \
     last_used_at_ms, last_used_ip, permissions_json, user_id, created_at_ms, updated_at_ms";

const REQUEST_COLUMNS: &str = "id, api_key_id, api_id, endpoint, method, headers_json, \
     query_params_json, request_body, response_headers_json, status_code, response_body, \
     duration_ms, user_agent, ip_address, timestamp_ms, metadata_json";

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite database at {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().context("open in-memory sqlite")?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("init sqlite schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite store lock poisoned"))
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn insert_user(&self, user: User) -> Result<()> {
        self.conn()?
            .execute(
                &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    user.id.to_string(),
                    user.email,
                    user.first_name,
                    user.last_name,
                    user.password_hash,
                    user.is_active,
                    user.is_email_verified,
                    dt_to_ms(user.created_at),
                    dt_to_ms(user.updated_at),
                ],
            )
            .context("insert user")?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.conn()?
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                user_from_row,
            )
            .optional()
            .context("get user")
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn()?
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()
            .context("find user by email")
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at_ms"))
            .context("prepare list users")?;
        let users = stmt
            .query_map([], user_from_row)
            .context("query list users")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("scan list users")?;
        Ok(users)
    }

    async fn update_user(&self, user: User) -> Result<()> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE users SET email = ?2, first_name = ?3, last_name = ?4, password_hash = ?5,
                 is_active = ?6, is_email_verified = ?7, updated_at_ms = ?8
                 WHERE id = ?1",
                params![
                    user.id.to_string(),
                    user.email,
                    user.first_name,
                    user.last_name,
                    user.password_hash,
                    user.is_active,
                    user.is_email_verified,
                    dt_to_ms(user.updated_at),
                ],
            )
            .context("update user")?;
        if updated == 0 {
            anyhow::bail!("user not found")
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])
            .context("delete user")?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl ApiKeyStore for SqliteStore {
    async fn insert_key(&self, key: ApiKey) -> Result<()> {
        let permissions = serde_json::to_string(&key.permissions)?;
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO api_keys ({KEY_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    key.id.to_string(),
                    key.key,
                    key.name,
                    key.description,
                    key.is_active,
                    key.expires_at.map(dt_to_ms),
                    key.usage_count as i64,
                    key.last_used_at.map(dt_to_ms),
                    key.last_used_ip,
                    permissions,
                    key.user_id.to_string(),
                    dt_to_ms(key.created_at),
                    dt_to_ms(key.updated_at),
                ],
            )
            .context("insert api key")?;
        Ok(())
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>> {
        self.conn()?
            .query_row(
                &format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE id = ?1"),
                params![id.to_string()],
                key_from_row,
            )
            .optional()
            .context("get api key")
    }

    async fn find_key_by_token(&self, token: &str) -> Result<Option<ApiKey>> {
        self.conn()?
            .query_row(
                &format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE key = ?1"),
                params![token],
                key_from_row,
            )
            .optional()
            .context("find api key by token")
    }

    async fn list_keys_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {KEY_COLUMNS} FROM api_keys WHERE user_id = ?1"))
            .context("prepare list api keys")?;
        let keys = stmt
            .query_map(params![user_id.to_string()], key_from_row)
            .context("query list api keys")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("scan list api keys")?;
        Ok(keys)
    }

    async fn update_key(&self, key: ApiKey) -> Result<()> {
        let permissions = serde_json::to_string(&key.permissions)?;
        let updated = self
            .conn()?
            .execute(
                "UPDATE api_keys SET key = ?2, name = ?3, description = ?4, is_active = ?5,
                 expires_at_ms = ?6, usage_count = ?7, last_used_at_ms = ?8, last_used_ip = ?9,
                 permissions_json = ?10, updated_at_ms = ?11
                 WHERE id = ?1",
                params![
                    key.id.to_string(),
                    key.key,
                    key.name,
                    key.description,
                    key.is_active,
                    key.expires_at.map(dt_to_ms),
                    key.usage_count as i64,
                    key.last_used_at.map(dt_to_ms),
                    key.last_used_ip,
                    permissions,
                    dt_to_ms(key.updated_at),
                ],
            )
            .context("update api key")?;
        if updated == 0 {
            anyhow::bail!("api key not found")
        }
        Ok(())
    }

    async fn delete_key(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM api_keys WHERE id = ?1", params![id.to_string()])
            .context("delete api key")?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl RequestStore for SqliteStore {
    async fn insert_request(&self, request: StoredRequest) -> Result<()> {
        let headers = serde_json::to_string(&request.headers)?;
        let query_params = request
            .query_params
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let response_headers = serde_json::to_string(&request.response_headers)?;
        let metadata = request
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO requests ({REQUEST_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    request.id.to_string(),
                    request.api_key_id.to_string(),
                    request.api_id,
                    request.endpoint,
                    request.method,
                    headers,
                    query_params,
                    request.request_body,
                    response_headers,
                    request.status_code as i64,
                    request.response_body,
                    request.duration as i64,
                    request.user_agent,
                    request.ip_address,
                    dt_to_ms(request.timestamp),
                    metadata,
                ],
            )
            .context("insert request")?;
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<StoredRequest>> {
        self.conn()?
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE id = ?1"),
                params![id.to_string()],
                request_from_row,
            )
            .optional()
            .context("get request")
    }

    async fn delete_request(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM requests WHERE id = ?1", params![id.to_string()])
            .context("delete request")?;
        Ok(deleted > 0)
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<StoredRequest>> {
        if filter.api_key_ids.is_empty() {
            return Ok(vec![]);
        }

        let mut values: Vec<String> = filter.api_key_ids.iter().map(Uuid::to_string).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        let mut sql = format!("SELECT {REQUEST_COLUMNS} FROM requests WHERE api_key_id IN ({placeholders})");
        if let Some(api_id) = &filter.api_id {
            sql.push_str(" AND api_id = ?");
            values.push(api_id.clone());
        }
        if let Some(endpoint) = &filter.endpoint {
            sql.push_str(" AND instr(lower(endpoint), ?) > 0");
            values.push(endpoint.to_lowercase());
        }
        if let Some(method) = &filter.method {
            sql.push_str(" AND method = ?");
            values.push(method.clone());
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).context("prepare list requests")?;
        let requests = stmt
            .query_map(params_from_iter(values.iter()), request_from_row)
            .context("query list requests")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("scan list requests")?;
        Ok(requests)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        password_hash: row.get(4)?,
        is_active: row.get(5)?,
        is_email_verified: row.get(6)?,
        created_at: ms_to_dt(row.get(7)?),
        updated_at: ms_to_dt(row.get(8)?),
    })
}

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        id: uuid_at(row, 0)?,
        key: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
        expires_at: row.get::<_, Option<i64>>(5)?.map(ms_to_dt),
        usage_count: row.get::<_, i64>(6)? as u64,
        last_used_at: row.get::<_, Option<i64>>(7)?.map(ms_to_dt),
        last_used_ip: row.get(8)?,
        permissions: json_at(row, 9)?,
        user_id: uuid_at(row, 10)?,
        created_at: ms_to_dt(row.get(11)?),
        updated_at: ms_to_dt(row.get(12)?),
    })
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<StoredRequest> {
    Ok(StoredRequest {
        id: uuid_at(row, 0)?,
        api_key_id: uuid_at(row, 1)?,
        api_id: row.get(2)?,
        endpoint: row.get(3)?,
        method: row.get(4)?,
        headers: json_at::<Map<String, Json>>(row, 5)?,
        query_params: optional_json_at(row, 6)?,
        request_body: row.get(7)?,
        response_headers: json_at::<Map<String, Json>>(row, 8)?,
        status_code: row.get::<_, i64>(9)? as u16,
        response_body: row.get(10)?,
        duration: row.get::<_, i64>(11)? as u64,
        user_agent: row.get(12)?,
        ip_address: row.get(13)?,
        timestamp: ms_to_dt(row.get(14)?),
        metadata: optional_json_at(row, 15)?,
    })
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_json_at<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod test {
    use chrono::Utc;

    use super::*;
    use crate::{
        core::{api_key, request},
        store::test::{exercise_store, user},
    };

    #[tokio::test]
    async fn sqlite_store_contract() {
        exercise_store(&SqliteStore::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_user(user("dup@example.com")).await.unwrap();
        assert!(store.insert_user(user("dup@example.com")).await.is_err());
    }

    #[tokio::test]
    async fn optional_columns_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let owner = user("opt@example.com");
        store.insert_user(owner.clone()).await.unwrap();
        let mut key = api_key::test::api_key(owner.id);
        key.permissions = vec!["record".into(), "replay".into()];
        key.expires_at = Some(Utc::now());
        store.insert_key(key.clone()).await.unwrap();

        let stored = store.get_key(key.id).await.unwrap().unwrap();
        assert_eq!(stored.permissions, key.permissions);
        assert_eq!(
            stored.expires_at.map(|t| t.timestamp_millis()),
            key.expires_at.map(|t| t.timestamp_millis())
        );

        let mut recorded = request::test::record("/q", "GET").into_stored(key.id, Utc::now());
        recorded.query_params = Some(
            serde_json::json!({ "page": 2, "tags": ["a", "b"] })
                .as_object()
                .cloned()
                .unwrap(),
        );
        recorded.metadata = Some(serde_json::json!({ "source": "sdk" }));
        store.insert_request(recorded.clone()).await.unwrap();

        let fetched = store.get_request(recorded.id).await.unwrap().unwrap();
        assert_eq!(fetched.query_params, recorded.query_params);
        assert_eq!(fetched.metadata, recorded.metadata);
        assert_eq!(fetched.response_body, recorded.response_body);
    }
}
