use axum::extract::State;
use tracing::instrument;

use crate::{
    auth::{AuthResponse, LoginRequest},
    core::user::{NewUser, UserProfile},
    server::{
        envelope::{created, ok, ApiResult},
        extract::{AuthUser, ValidJson},
        AppState,
    },
};

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    ValidJson(new_user): ValidJson<NewUser>,
) -> ApiResult<AuthResponse> {
    created(state.auth.register(new_user).await?)
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    ValidJson(login): ValidJson<LoginRequest>,
) -> ApiResult<AuthResponse> {
    ok(state.auth.login(&login.email, &login.password).await?)
}

#[instrument(skip(state))]
pub async fn profile(State(state): State<AppState>, user: AuthUser) -> ApiResult<UserProfile> {
    ok(state.auth.profile(user.id).await?)
}
