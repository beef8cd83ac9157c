use axum::extract::{rejection::QueryRejection, Path, Query, State};
use tracing::instrument;

use crate::{
    core::request::{PageQuery, RecordRequest, RequestPage, RequestStats, StoredRequest},
    server::{
        envelope::{created, message, ok, ApiResult, Message},
        extract::{ApiKeyAuth, IdParam, ValidJson},
        AppState,
    },
};

#[instrument(skip_all, fields(key_id = %key.id))]
pub async fn record(
    State(state): State<AppState>,
    ApiKeyAuth(key): ApiKeyAuth,
    ValidJson(request): ValidJson<RecordRequest>,
) -> ApiResult<StoredRequest> {
    created(state.recording.record(&key, request).await?)
}

#[instrument(skip_all, fields(key_id = %key.id))]
pub async fn list(
    State(state): State<AppState>,
    ApiKeyAuth(key): ApiKeyAuth,
) -> ApiResult<Vec<StoredRequest>> {
    ok(state.recording.find_all(&key).await?)
}

#[instrument(skip(state, key))]
pub async fn get(
    State(state): State<AppState>,
    ApiKeyAuth(key): ApiKeyAuth,
    IdParam(id): IdParam,
) -> ApiResult<StoredRequest> {
    ok(state.recording.find_one(&key, id).await?)
}

#[instrument(skip(state, key))]
pub async fn remove(
    State(state): State<AppState>,
    ApiKeyAuth(key): ApiKeyAuth,
    IdParam(id): IdParam,
) -> ApiResult<Message> {
    state.recording.remove(&key, id).await?;
    message("Request deleted successfully")
}

#[instrument(skip(state, key, query))]
pub async fn requests(
    State(state): State<AppState>,
    ApiKeyAuth(key): ApiKeyAuth,
    Path(api_id): Path<String>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult<RequestPage> {
    let Query(page) = query?;
    ok(state.recording.recorded_requests(&key, &api_id, &page).await?)
}

#[instrument(skip(state, key))]
pub async fn stats(
    State(state): State<AppState>,
    ApiKeyAuth(key): ApiKeyAuth,
    Path(api_id): Path<String>,
) -> ApiResult<RequestStats> {
    ok(state.recording.stats(&key, &api_id).await?)
}
