//! API key lifecycle and validation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    core::api_key::{generate_key, ApiKey, ApiKeyUpdate, ApiKeyUsageStats, NewApiKey},
    error::{Error, Result, Validate},
    store::Store,
};

const NOT_FOUND: &str = "API key not found";

#[derive(Debug, Clone)]
pub struct ApiKeysService {
    store: Arc<dyn Store>,
}

impl ApiKeysService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, user_id: Uuid, new_key: NewApiKey) -> Result<ApiKey> {
        new_key.validate()?;
        if self.store.get_user(user_id).await?.is_none() {
            return Err(Error::not_found("User not found"));
        }

        let now = Utc::now();
        let key = ApiKey {
            id: Uuid::new_v4(),
            key: generate_key(),
            name: new_key.name,
            description: new_key.description,
            is_active: true,
            expires_at: new_key.expires_at,
            usage_count: 0,
            last_used_at: None,
            last_used_ip: None,
            permissions: new_key.permissions.unwrap_or_default(),
            user_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_key(key.clone()).await?;
        info!(key_id = %key.id, %user_id, "created api key");
        Ok(key)
    }

    /// Newest first.
    pub async fn find_all_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>> {
        let mut keys = self.store.list_keys_for_user(user_id).await?;
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    pub async fn find_one(&self, id: Uuid, user_id: Uuid) -> Result<ApiKey> {
        match self.store.get_key(id).await? {
            Some(key) if key.user_id == user_id => Ok(key),
            _ => Err(Error::not_found(NOT_FOUND)),
        }
    }

    /// Active keys only; expiry is not checked here.
    pub async fn find_by_key(&self, token: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .store
            .find_key_by_token(token)
            .await?
            .filter(|key| key.is_active))
    }

    pub async fn update(&self, id: Uuid, user_id: Uuid, update: ApiKeyUpdate) -> Result<ApiKey> {
        update.validate()?;
        let mut key = self.find_one(id, user_id).await?;
        if let Some(name) = update.name {
            key.name = name;
        }
        if update.description.is_some() {
            key.description = update.description;
        }
        key.expires_at = update.expires_at;
        if let Some(permissions) = update.permissions {
            key.permissions = permissions;
        }
        if let Some(is_active) = update.is_active {
            key.is_active = is_active;
        }
        key.updated_at = Utc::now();
        self.store.update_key(key.clone()).await?;
        debug!(key_id = %id, "updated api key");
        Ok(key)
    }

    pub async fn remove(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let key = self.find_one(id, user_id).await?;
        self.store.delete_key(key.id).await?;
        info!(key_id = %id, "removed api key");
        Ok(())
    }

    pub async fn deactivate(&self, id: Uuid, user_id: Uuid) -> Result<ApiKey> {
        let mut key = self.find_one(id, user_id).await?;
        key.is_active = false;
        key.updated_at = Utc::now();
        self.store.update_key(key.clone()).await?;
        info!(key_id = %id, "deactivated api key");
        Ok(key)
    }

    /// Issues a new token for the key and resets its usage counter.
    pub async fn regenerate(&self, id: Uuid, user_id: Uuid) -> Result<ApiKey> {
        let mut key = self.find_one(id, user_id).await?;
        key.key = generate_key();
        key.usage_count = 0;
        key.last_used_at = None;
        key.last_used_ip = None;
        key.updated_at = Utc::now();
        self.store.update_key(key.clone()).await?;
        info!(key_id = %id, "regenerated api key");
        Ok(key)
    }

    pub async fn usage_stats(&self, user_id: Uuid) -> Result<ApiKeyUsageStats> {
        let keys = self.store.list_keys_for_user(user_id).await?;
        Ok(ApiKeyUsageStats::collect(&keys, Utc::now()))
    }

    /// Returns the key behind `token` if it is active and unexpired, recording
    /// the use. `None` otherwise.
    pub async fn validate_api_key(&self, token: &str, ip: Option<&str>) -> Result<Option<ApiKey>> {
        let Some(mut key) = self.find_by_key(token).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        if key.is_expired_at(now) {
            debug!(key_id = %key.id, "api key expired");
            return Ok(None);
        }
        key.usage_count += 1;
        key.last_used_at = Some(now);
        if let Some(ip) = ip {
            key.last_used_ip = Some(ip.to_string());
        }
        self.store.update_key(key.clone()).await?;
        Ok(Some(key))
    }

    /// Whether `token` is a usable key owned by `owner`.
    pub async fn verify_api_key(&self, owner: Uuid, token: &str) -> Result<bool> {
        Ok(self
            .validate_api_key(token, None)
            .await?
            .is_some_and(|key| key.user_id == owner))
    }

    /// Ids of every key owned by `user_id`.
    pub async fn account_key_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let keys = self.store.list_keys_for_user(user_id).await?;
        Ok(keys.into_iter().map(|key| key.id).collect())
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::store::{test::user, MemoryStore, UserStore};

    async fn setup() -> (ApiKeysService, Uuid) {
        let store = Arc::new(MemoryStore::default());
        let owner = user("owner@example.com");
        store.insert_user(owner.clone()).await.unwrap();
        (ApiKeysService::new(store), owner.id)
    }

    fn named(name: &str) -> NewApiKey {
        NewApiKey {
            name: name.into(),
            description: None,
            expires_at: None,
            permissions: None,
        }
    }

    #[tokio::test]
    async fn create_and_list_newest_first() {
        let (keys, owner) = setup().await;
        let first = keys.create(owner, named("first")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = keys.create(owner, named("second")).await.unwrap();

        assert!(first.key.starts_with("cs_"));
        assert!(first.permissions.is_empty());
        let listed = keys.find_all_by_user(owner).await.unwrap();
        assert_eq!(
            listed.iter().map(|k| k.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
    }

    #[tokio::test]
    async fn other_users_cannot_see_a_key() {
        let (keys, owner) = setup().await;
        let key = keys.create(owner, named("mine")).await.unwrap();
        assert!(matches!(
            keys.find_one(key.id, Uuid::new_v4()).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            keys.remove(key.id, Uuid::new_v4()).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn validation_bumps_usage() {
        let (keys, owner) = setup().await;
        let key = keys.create(owner, named("k")).await.unwrap();

        let used = keys
            .validate_api_key(&key.key, Some("203.0.113.9"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(used.usage_count, 1);
        assert_eq!(used.last_used_ip.as_deref(), Some("203.0.113.9"));
        assert!(used.last_used_at.is_some());

        assert!(keys.verify_api_key(owner, &key.key).await.unwrap());
        assert!(!keys.verify_api_key(Uuid::new_v4(), &key.key).await.unwrap());
        assert_eq!(keys.find_one(key.id, owner).await.unwrap().usage_count, 3);

        assert!(keys.validate_api_key("cs_unknown", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn inactive_or_expired_keys_do_not_validate() {
        let (keys, owner) = setup().await;
        let key = keys.create(owner, named("k")).await.unwrap();
        keys.deactivate(key.id, owner).await.unwrap();
        assert!(keys.validate_api_key(&key.key, None).await.unwrap().is_none());
        assert!(keys.find_by_key(&key.key).await.unwrap().is_none());

        let mut expiring = named("old");
        expiring.expires_at = Some(Utc::now() - Duration::minutes(1));
        let expired = keys.create(owner, expiring).await.unwrap();
        assert!(keys.find_by_key(&expired.key).await.unwrap().is_some());
        assert!(keys.validate_api_key(&expired.key, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn regenerate_replaces_token_and_resets_usage() {
        let (keys, owner) = setup().await;
        let key = keys.create(owner, named("k")).await.unwrap();
        keys.validate_api_key(&key.key, None).await.unwrap();

        let regenerated = keys.regenerate(key.id, owner).await.unwrap();
        assert_ne!(regenerated.key, key.key);
        assert_eq!(regenerated.usage_count, 0);
        assert!(keys.validate_api_key(&key.key, None).await.unwrap().is_none());
        assert!(keys
            .validate_api_key(&regenerated.key, None)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn update_and_stats() {
        let (keys, owner) = setup().await;
        let a = keys.create(owner, named("a")).await.unwrap();
        let b = keys.create(owner, named("b")).await.unwrap();
        keys.validate_api_key(&a.key, None).await.unwrap();
        keys.validate_api_key(&a.key, None).await.unwrap();

        let updated = keys
            .update(
                b.id,
                owner,
                ApiKeyUpdate {
                    name: Some("renamed".into()),
                    permissions: Some(vec!["replay".into()]),
                    is_active: Some(false),
                    ..ApiKeyUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.permissions, vec!["replay".to_string()]);

        let stats = keys.usage_stats(owner).await.unwrap();
        assert_eq!(
            stats,
            ApiKeyUsageStats {
                total_keys: 2,
                total_usage: 2,
                active_keys: 1,
                expired_keys: 0,
            }
        );
    }
}
