//! Recorded requests, scoped to the account of the presenting API key.
//!
//! A key sees every request recorded by any key of the same user, so
//! rotating or adding keys does not hide history.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    api_keys::ApiKeysService,
    core::{
        api_key::ApiKey,
        request::{PageQuery, RecordRequest, RequestFilter, RequestPage, RequestStats, StoredRequest},
    },
    error::{Error, Result, Validate},
    store::Store,
};

const NOT_FOUND: &str = "Request not found";

#[derive(Debug, Clone)]
pub struct RecordingService {
    store: Arc<dyn Store>,
    api_keys: ApiKeysService,
}

impl RecordingService {
    pub fn new(store: Arc<dyn Store>, api_keys: ApiKeysService) -> Self {
        Self { store, api_keys }
    }

    pub async fn record(&self, key: &ApiKey, request: RecordRequest) -> Result<StoredRequest> {
        request.validate()?;
        let stored = request.into_stored(key.id, Utc::now());
        self.store.insert_request(stored.clone()).await?;
        info!(
            request_id = %stored.id,
            api_id = %stored.api_id,
            method = %stored.method,
            "recorded request"
        );
        Ok(stored)
    }

    /// Newest first.
    pub async fn find_all(&self, key: &ApiKey) -> Result<Vec<StoredRequest>> {
        let filter = self.account_filter(key).await?;
        self.list_newest_first(&filter).await
    }

    pub async fn find_one(&self, key: &ApiKey, id: Uuid) -> Result<StoredRequest> {
        let request = self
            .store
            .get_request(id)
            .await?
            .ok_or_else(|| Error::not_found(NOT_FOUND))?;
        if !self.account_filter(key).await?.api_key_ids.contains(&request.api_key_id) {
            return Err(Error::not_found(NOT_FOUND));
        }
        Ok(request)
    }

    pub async fn remove(&self, key: &ApiKey, id: Uuid) -> Result<()> {
        let request = self.find_one(key, id).await?;
        self.store.delete_request(request.id).await?;
        debug!(request_id = %id, "removed recorded request");
        Ok(())
    }

    pub async fn recorded_requests(
        &self,
        key: &ApiKey,
        api_id: &str,
        page: &PageQuery,
    ) -> Result<RequestPage> {
        let mut filter = self.account_filter(key).await?;
        filter.api_id = Some(api_id.to_string());
        filter.endpoint = page.endpoint.clone().filter(|e| !e.is_empty());
        filter.method = page.method.clone().filter(|m| !m.is_empty());

        let matching = self.list_newest_first(&filter).await?;
        let total = matching.len();
        let requests = matching
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .collect();
        Ok(RequestPage { requests, total })
    }

    pub async fn stats(&self, key: &ApiKey, api_id: &str) -> Result<RequestStats> {
        let mut filter = self.account_filter(key).await?;
        filter.api_id = Some(api_id.to_string());
        let requests = self.store.list_requests(&filter).await?;
        Ok(RequestStats::collect(&requests))
    }

    async fn account_filter(&self, key: &ApiKey) -> Result<RequestFilter> {
        let key_ids = self.api_keys.account_key_ids(key.user_id).await?;
        Ok(RequestFilter::owned_by(key_ids))
    }

    async fn list_newest_first(&self, filter: &RequestFilter) -> Result<Vec<StoredRequest>> {
        let mut requests = self.store.list_requests(filter).await?;
        requests.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(requests)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        core::{api_key::NewApiKey, request::test::record},
        store::{test::user, MemoryStore, UserStore},
    };

    struct Fixture {
        recording: RecordingService,
        api_keys: ApiKeysService,
        store: Arc<MemoryStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::default());
            let api_keys = ApiKeysService::new(store.clone());
            Self {
                recording: RecordingService::new(store.clone(), api_keys.clone()),
                api_keys,
                store,
            }
        }

        async fn key_for(&self, email: &str) -> ApiKey {
            let owner = match self.store.find_user_by_email(email).await.unwrap() {
                Some(owner) => owner,
                None => {
                    let owner = user(email);
                    self.store.insert_user(owner.clone()).await.unwrap();
                    owner
                }
            };
            self.api_keys
                .create(
                    owner.id,
                    NewApiKey {
                        name: "key".into(),
                        description: None,
                        expires_at: None,
                        permissions: None,
                    },
                )
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn record_rejects_unknown_methods() {
        let fx = Fixture::new();
        let key = fx.key_for("a@example.com").await;
        let err = fx.recording.record(&key, record("/x", "TRACE")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn requests_are_shared_across_an_account_only() {
        let fx = Fixture::new();
        let first = fx.key_for("a@example.com").await;
        let second = fx.key_for("a@example.com").await;
        let stranger = fx.key_for("b@example.com").await;

        let stored = fx.recording.record(&first, record("/x", "GET")).await.unwrap();
        assert_eq!(stored.api_key_id, first.id);

        assert_eq!(fx.recording.find_one(&second, stored.id).await.unwrap().id, stored.id);
        assert!(matches!(
            fx.recording.find_one(&stranger, stored.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(fx.recording.find_all(&stranger).await.unwrap().is_empty());
        assert!(matches!(
            fx.recording.remove(&stranger, stored.id).await.unwrap_err(),
            Error::NotFound(_)
        ));

        fx.recording.remove(&second, stored.id).await.unwrap();
        assert!(fx.recording.find_all(&first).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pages_are_newest_first_with_total() {
        let fx = Fixture::new();
        let key = fx.key_for("a@example.com").await;
        let mut ids = Vec::new();
        for i in 0..5 {
            let stored = fx
                .recording
                .record(&key, record(&format!("/items/{i}"), "GET"))
                .await
                .unwrap();
            ids.push(stored.id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let mut other_api = record("/elsewhere", "GET");
        other_api.api_id = "billing".into();
        fx.recording.record(&key, other_api).await.unwrap();

        let page = fx
            .recording
            .recorded_requests(
                &key,
                "payments",
                &PageQuery {
                    limit: Some(2),
                    offset: Some(1),
                    ..PageQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(
            page.requests.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![ids[3], ids[2]]
        );

        let filtered = fx
            .recording
            .recorded_requests(
                &key,
                "payments",
                &PageQuery {
                    endpoint: Some("ITEMS/4".into()),
                    ..PageQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.requests[0].id, ids[4]);
    }

    #[tokio::test]
    async fn stats_cover_one_api() {
        let fx = Fixture::new();
        let key = fx.key_for("a@example.com").await;
        fx.recording.record(&key, record("/a", "GET")).await.unwrap();
        fx.recording.record(&key, record("/b", "POST")).await.unwrap();

        let stats = fx.recording.stats(&key, "payments").await.unwrap();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.unique_endpoints, 2);
        assert_eq!(stats.avg_duration, 120.0);

        let none = fx.recording.stats(&key, "unknown").await.unwrap();
        assert_eq!(none, RequestStats::default());
    }
}
