//! Persistence for users, API keys and recorded requests.
//!
//! The services only talk to the [UserStore], [ApiKeyStore] and
//! [RequestStore] traits. [MemoryStore] backs tests and throwaway runs;
//! `SqliteStore` (feature `sqlite`) keeps data across restarts.
//!
//! Both backends enforce the same referential rules: removing a user removes
//! their API keys, and removing an API key removes the requests recorded
//! with it.

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::{
    api_key::ApiKey,
    request::{RequestFilter, StoredRequest},
    user::User,
};

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[async_trait]
pub trait UserStore: Debug + Send + Sync {
    /// Fails if the id or the email is already taken.
    async fn insert_user(&self, user: User) -> Result<()>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    /// Exact, case-sensitive match.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn list_users(&self) -> Result<Vec<User>>;

    /// Replaces the stored user with the same id.
    async fn update_user(&self, user: User) -> Result<()>;

    /// Returns whether a user was removed.
    async fn delete_user(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait ApiKeyStore: Debug + Send + Sync {
    /// Fails if the id or the token is already taken.
    async fn insert_key(&self, key: ApiKey) -> Result<()>;

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>>;

    async fn find_key_by_token(&self, token: &str) -> Result<Option<ApiKey>>;

    async fn list_keys_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>>;

    async fn update_key(&self, key: ApiKey) -> Result<()>;

    async fn delete_key(&self, id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait RequestStore: Debug + Send + Sync {
    async fn insert_request(&self, request: StoredRequest) -> Result<()>;

    async fn get_request(&self, id: Uuid) -> Result<Option<StoredRequest>>;

    async fn delete_request(&self, id: Uuid) -> Result<bool>;

    /// Every request matching `filter`, in no particular order.
    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<StoredRequest>>;
}

/// Every store the services need.
pub trait Store: UserStore + ApiKeyStore + RequestStore {}

impl<T: UserStore + ApiKeyStore + RequestStore> Store for T {}

/// A local in-memory store.
///
/// # Warning
/// Data lives only as long as the process; this is meant for tests and
/// local experiments.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<Uuid, User>,
    keys: BTreeMap<Uuid, ApiKey>,
    requests: BTreeMap<Uuid, StoredRequest>,
}

impl Tables {
    fn remove_key_cascade(&mut self, id: Uuid) -> bool {
        if self.keys.remove(&id).is_none() {
            return false;
        }
        self.requests.retain(|_, request| request.api_key_id != id);
        true
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(&user.id) {
            bail!("user {} already exists", user.id)
        }
        if tables.users.values().any(|u| u.email == user.email) {
            bail!("email {} is already registered", user.email)
        }
        tables.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.tables.lock().await.users.values().cloned().collect())
    }

    async fn update_user(&self, user: User) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            bail!("email {} is already registered", user.email)
        }
        match tables.users.get_mut(&user.id) {
            Some(stored) => {
                *stored = user;
                Ok(())
            }
            None => bail!("user not found"),
        }
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }
        let owned: Vec<Uuid> = tables
            .keys
            .values()
            .filter(|key| key.user_id == id)
            .map(|key| key.id)
            .collect();
        for key_id in owned {
            tables.remove_key_cascade(key_id);
        }
        Ok(true)
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn insert_key(&self, key: ApiKey) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&key.user_id) {
            bail!("user {} does not exist", key.user_id)
        }
        if tables.keys.contains_key(&key.id) || tables.keys.values().any(|k| k.key == key.key) {
            bail!("api key already exists")
        }
        tables.keys.insert(key.id, key);
        Ok(())
    }

    async fn get_key(&self, id: Uuid) -> Result<Option<ApiKey>> {
        Ok(self.tables.lock().await.keys.get(&id).cloned())
    }

    async fn find_key_by_token(&self, token: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .tables
            .lock()
            .await
            .keys
            .values()
            .find(|key| key.key == token)
            .cloned())
    }

    async fn list_keys_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        Ok(self
            .tables
            .lock()
            .await
            .keys
            .values()
            .filter(|key| key.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_key(&self, key: ApiKey) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .keys
            .values()
            .any(|k| k.id != key.id && k.key == key.key)
        {
            bail!("api key already exists")
        }
        match tables.keys.get_mut(&key.id) {
            Some(stored) => {
                *stored = key;
                Ok(())
            }
            None => bail!("api key not found"),
        }
    }

    async fn delete_key(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.lock().await.remove_key_cascade(id))
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert_request(&self, request: StoredRequest) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if !tables.keys.contains_key(&request.api_key_id) {
            bail!("api key {} does not exist", request.api_key_id)
        }
        if tables.requests.contains_key(&request.id) {
            bail!("request {} already exists", request.id)
        }
        tables.requests.insert(request.id, request);
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> Result<Option<StoredRequest>> {
        Ok(self.tables.lock().await.requests.get(&id).cloned())
    }

    async fn delete_request(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.lock().await.requests.remove(&id).is_some())
    }

    async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<StoredRequest>> {
        Ok(self
            .tables
            .lock()
            .await
            .requests
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect())
    }
}
