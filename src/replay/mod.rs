//! Re-issuing recorded requests against their original destination.

use std::{collections::HashSet, sync::Arc, time::Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use http::{header::HeaderName, HeaderMap, HeaderValue, Method, Request};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    api_keys::ApiKeysService,
    core::{request::StoredRequest, util::AsyncHttpClient},
    error::{Error, Result},
    store::Store,
};

/// Headers never forwarded on replay, compared case-insensitively.
pub const STRIPPED_HEADERS: [&str; 4] = ["host", "content-length", "connection", "x-api-key"];

const INVALID_REPLAY: &str = "Invalid API key or request not found";

/// The live outcome of a replay, next to what was originally recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResult {
    pub status_code: u16,
    pub headers: Map<String, Json>,
    /// Parsed JSON when the live body is JSON, the raw text otherwise.
    pub body: Json,
    /// Milliseconds spent on the live call.
    pub duration: u64,
    pub original_request: OriginalRequest,
    pub replay_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalRequest {
    pub id: Uuid,
    pub method: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub duration: u64,
}

#[derive(Debug, Clone)]
pub struct Replayer {
    store: Arc<dyn Store>,
    api_keys: ApiKeysService,
    client: Arc<dyn AsyncHttpClient + Send + Sync>,
    warmed_hosts: Arc<Mutex<HashSet<String>>>,
}

impl Replayer {
    pub fn new(
        store: Arc<dyn Store>,
        api_keys: ApiKeysService,
        client: Arc<dyn AsyncHttpClient + Send + Sync>,
    ) -> Self {
        Self {
            store,
            api_keys,
            client,
            warmed_hosts: Arc::default(),
        }
    }

    #[instrument(skip(self, presented_key))]
    pub async fn replay(&self, request_id: Uuid, presented_key: &str) -> Result<ReplayResult> {
        let Some(request) = self.find_valid_request(request_id, presented_key).await? else {
            return Err(Error::unauthorized(INVALID_REPLAY));
        };

        let outbound = build_request(&request).map_err(|e| Error::Replay(format!("{e:#}")))?;
        self.warm(&request.endpoint).await;

        let started = Instant::now();
        let response = self
            .client
            .execute(outbound)
            .await
            .map_err(|e| Error::Replay(format!("{e:#}")))?;
        let duration = started.elapsed().as_millis() as u64;

        info!(
            status = response.status().as_u16(),
            duration_ms = duration,
            "replayed request"
        );

        Ok(ReplayResult {
            status_code: response.status().as_u16(),
            headers: headers_to_json(response.headers()),
            body: body_to_json(response.body()),
            duration,
            original_request: OriginalRequest {
                id: request.id,
                method: request.method,
                endpoint: request.endpoint,
                timestamp: request.timestamp,
                duration: request.duration,
            },
            replay_timestamp: Utc::now(),
        })
    }

    /// The stored request, provided `presented_key` is a usable key of the
    /// account that recorded it.
    pub async fn find_valid_request(
        &self,
        request_id: Uuid,
        presented_key: &str,
    ) -> Result<Option<StoredRequest>> {
        let Some(request) = self.store.get_request(request_id).await? else {
            debug!("no such request");
            return Ok(None);
        };
        let Some(recorded_with) = self.store.get_key(request.api_key_id).await? else {
            return Ok(None);
        };
        if !self
            .api_keys
            .verify_api_key(recorded_with.user_id, presented_key)
            .await?
        {
            debug!("presented key does not own the request");
            return Ok(None);
        }
        Ok(Some(request))
    }

    /// Sends a `HEAD` to the bare endpoint the first time its host is
    /// replayed against.
    async fn warm(&self, endpoint: &str) {
        let Ok(url) = Url::parse(endpoint) else {
            return;
        };
        let Some(host) = url.host_str() else {
            return;
        };
        if self.warmed_hosts.lock().await.contains(host) {
            return;
        }

        let head = Request::builder()
            .method(Method::HEAD)
            .uri(url.as_str())
            .body(Vec::new());
        let outcome = match head {
            Ok(head) => self.client.execute(head).await.map(drop),
            Err(e) => Err(e.into()),
        };
        match outcome {
            Ok(()) => {
                self.warmed_hosts.lock().await.insert(host.to_string());
                debug!(host, "warmed connection");
            }
            Err(e) => warn!(host, "failed to warm connection: {e:#}"),
        }
    }
}

/// Drops the headers listed in [STRIPPED_HEADERS].
pub fn sanitize_headers(headers: &Map<String, Json>) -> Map<String, Json> {
    headers
        .iter()
        .filter(|(name, _)| {
            !STRIPPED_HEADERS
                .iter()
                .any(|stripped| name.eq_ignore_ascii_case(stripped))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn build_request(stored: &StoredRequest) -> anyhow::Result<Request<Vec<u8>>> {
    let mut url = Url::parse(&stored.endpoint)
        .with_context(|| format!("invalid endpoint {}", stored.endpoint))?;
    if let Some(query) = stored.query_params.as_ref().filter(|q| !q.is_empty()) {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in query {
            for value in flatten(value) {
                pairs.append_pair(name, &value);
            }
        }
    }

    let method = Method::from_bytes(stored.method.as_bytes())
        .with_context(|| format!("invalid method {}", stored.method))?;

    let mut builder = Request::builder().method(method).uri(url.as_str());
    let headers = builder
        .headers_mut()
        .context("unable to set headers")?;
    for (name, value) in sanitize_headers(&stored.headers) {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!(header = %name, "skipping invalid header name");
            continue;
        };
        for value in flatten(&value) {
            match HeaderValue::from_str(&value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => debug!(header = %name, "skipping invalid header value"),
            }
        }
    }

    let body = stored
        .request_body
        .as_ref()
        .map(|body| body.as_bytes().to_vec())
        .unwrap_or_default();
    builder.body(body).context("unable to construct request")
}

/// Renders a JSON value as the list of strings a header or query parameter
/// should carry.
fn flatten(value: &Json) -> Vec<String> {
    match value {
        Json::Null => vec![],
        Json::String(s) => vec![s.clone()],
        Json::Array(values) => values.iter().flat_map(flatten).collect(),
        other => vec![other.to_string()],
    }
}

fn headers_to_json(headers: &HeaderMap) -> Map<String, Json> {
    let mut map = Map::new();
    for name in headers.keys() {
        let mut values: Vec<Json> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| Json::String(v.to_string()))
            .collect();
        // Repeated headers such as set-cookie cannot be comma joined.
        let value = match values.len() {
            0 => continue,
            1 => values.remove(0),
            _ => Json::Array(values),
        };
        map.insert(name.as_str().to_string(), value);
    }
    map
}

fn body_to_json(body: &[u8]) -> Json {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Json::String(String::from_utf8_lossy(body).into_owned()))
}
