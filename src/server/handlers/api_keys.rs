use axum::extract::State;
use tracing::instrument;

use crate::{
    core::api_key::{ApiKey, ApiKeyUpdate, ApiKeyUsageStats, NewApiKey},
    server::{
        envelope::{created, message, ok, ApiResult, Message},
        extract::{AuthUser, IdParam, ValidJson},
        AppState,
    },
};

#[instrument(skip(state, new_key))]
pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(new_key): ValidJson<NewApiKey>,
) -> ApiResult<ApiKey> {
    created(state.api_keys.create(user.id, new_key).await?)
}

#[instrument(skip(state))]
pub async fn list(State(state): State<AppState>, user: AuthUser) -> ApiResult<Vec<ApiKey>> {
    ok(state.api_keys.find_all_by_user(user.id).await?)
}

#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>, user: AuthUser) -> ApiResult<ApiKeyUsageStats> {
    ok(state.api_keys.usage_stats(user.id).await?)
}

#[instrument(skip(state))]
pub async fn get(
    State(state): State<AppState>,
    user: AuthUser,
    IdParam(id): IdParam,
) -> ApiResult<ApiKey> {
    ok(state.api_keys.find_one(id, user.id).await?)
}

#[instrument(skip(state, update))]
pub async fn update(
    State(state): State<AppState>,
    user: AuthUser,
    IdParam(id): IdParam,
    ValidJson(update): ValidJson<ApiKeyUpdate>,
) -> ApiResult<ApiKey> {
    ok(state.api_keys.update(id, user.id, update).await?)
}

#[instrument(skip(state))]
pub async fn remove(
    State(state): State<AppState>,
    user: AuthUser,
    IdParam(id): IdParam,
) -> ApiResult<Message> {
    state.api_keys.remove(id, user.id).await?;
    message("API key deleted successfully")
}

#[instrument(skip(state))]
pub async fn deactivate(
    State(state): State<AppState>,
    user: AuthUser,
    IdParam(id): IdParam,
) -> ApiResult<ApiKey> {
    created(state.api_keys.deactivate(id, user.id).await?)
}

#[instrument(skip(state))]
pub async fn regenerate(
    State(state): State<AppState>,
    user: AuthUser,
    IdParam(id): IdParam,
) -> ApiResult<ApiKey> {
    created(state.api_keys.regenerate(id, user.id).await?)
}
