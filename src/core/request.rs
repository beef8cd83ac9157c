use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use uuid::Uuid;

use crate::error::Validate;

/// Methods accepted when recording a request.
pub const RECORDABLE_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS", "HEAD"];

pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

/// A recorded HTTP exchange against a third-party API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRequest {
    pub id: Uuid,
    /// The API key the exchange was recorded with.
    pub api_key_id: Uuid,
    pub api_id: String,
    pub endpoint: String,
    pub method: String,
    pub headers: Map<String, Json>,
    pub query_params: Option<Map<String, Json>>,
    pub request_body: Option<String>,
    pub response_headers: Map<String, Json>,
    pub status_code: u16,
    pub response_body: Option<String>,
    /// Milliseconds.
    pub duration: u64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<Json>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordRequest {
    pub api_id: String,
    pub endpoint: String,
    pub method: String,
    pub headers: Map<String, Json>,
    pub query_params: Option<Map<String, Json>>,
    pub request_body: Option<String>,
    pub response_headers: Map<String, Json>,
    pub status_code: u16,
    pub response_body: Option<String>,
    pub duration: u64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<Map<String, Json>>,
}

impl Validate for RecordRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.api_id.trim().is_empty() {
            problems.push("apiId must not be empty".to_string());
        }
        if self.endpoint.trim().is_empty() {
            problems.push("endpoint must not be empty".to_string());
        }
        if !RECORDABLE_METHODS.contains(&self.method.as_str()) {
            problems.push(format!(
                "method must be one of the following values: {}",
                RECORDABLE_METHODS.join(", ")
            ));
        }
        if !(100..=599).contains(&self.status_code) {
            problems.push("statusCode must be a valid HTTP status".to_string());
        }
        problems
    }
}

impl RecordRequest {
    pub fn into_stored(self, api_key_id: Uuid, timestamp: DateTime<Utc>) -> StoredRequest {
        StoredRequest {
            id: Uuid::new_v4(),
            api_key_id,
            api_id: self.api_id,
            endpoint: self.endpoint,
            method: self.method,
            headers: self.headers,
            query_params: self.query_params,
            request_body: self.request_body,
            response_headers: self.response_headers,
            status_code: self.status_code,
            response_body: self.response_body,
            duration: self.duration,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            timestamp,
            metadata: self.metadata.map(Json::Object),
        }
    }
}

/// Selection of stored requests. Only requests recorded with one of
/// `api_key_ids` match.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub api_key_ids: Vec<Uuid>,
    pub api_id: Option<String>,
    /// Case-insensitive substring of the endpoint.
    pub endpoint: Option<String>,
    pub method: Option<String>,
}

impl RequestFilter {
    pub fn owned_by(api_key_ids: Vec<Uuid>) -> Self {
        Self {
            api_key_ids,
            ..Self::default()
        }
    }

    pub fn matches(&self, request: &StoredRequest) -> bool {
        self.api_key_ids.contains(&request.api_key_id)
            && self.api_id.as_ref().map_or(true, |api_id| &request.api_id == api_id)
            && self.endpoint.as_ref().map_or(true, |needle| {
                request
                    .endpoint
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            })
            && self.method.as_ref().map_or(true, |method| &request.method == method)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
}

impl PageQuery {
    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPage {
    pub requests: Vec<StoredRequest>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodStats {
    pub method: String,
    pub count: u64,
    pub avg_duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    pub total_requests: u64,
    pub unique_endpoints: u64,
    pub avg_duration: f64,
    pub methods: Vec<MethodStats>,
}

impl RequestStats {
    pub fn collect<'a>(requests: impl IntoIterator<Item = &'a StoredRequest>) -> Self {
        let mut endpoints = BTreeSet::new();
        // Durations are client supplied, so sums are kept in u128.
        let mut per_method: BTreeMap<&str, (u64, u128)> = BTreeMap::new();
        let mut total_duration = 0u128;
        let mut total_requests = 0u64;

        for request in requests {
            total_requests += 1;
            total_duration += u128::from(request.duration);
            endpoints.insert(request.endpoint.as_str());
            let entry = per_method.entry(request.method.as_str()).or_default();
            entry.0 += 1;
            entry.1 += u128::from(request.duration);
        }

        Self {
            total_requests,
            unique_endpoints: endpoints.len() as u64,
            avg_duration: average(total_duration, total_requests),
            methods: per_method
                .into_iter()
                .map(|(method, (count, duration))| MethodStats {
                    method: method.to_string(),
                    count,
                    avg_duration: average(duration, count),
                })
                .collect(),
        }
    }
}

fn average(sum: u128, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}
