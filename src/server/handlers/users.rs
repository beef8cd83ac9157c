use axum::extract::State;
use tracing::instrument;

use crate::{
    core::user::{NewUser, PublicUser, UserProfile, UserUpdate},
    server::{
        envelope::{created, message, ok, ApiResult, Message},
        extract::{AuthUser, ValidJson},
        AppState,
    },
};

#[instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    ValidJson(new_user): ValidJson<NewUser>,
) -> ApiResult<PublicUser> {
    created(state.users.create(new_user).await?)
}

#[instrument(skip(state))]
pub async fn profile(State(state): State<AppState>, user: AuthUser) -> ApiResult<UserProfile> {
    ok(state.users.profile(user.id).await?)
}

#[instrument(skip(state, update))]
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    ValidJson(update): ValidJson<UserUpdate>,
) -> ApiResult<PublicUser> {
    ok(state.users.update(user.id, update).await?)
}

#[instrument(skip(state))]
pub async fn delete_profile(State(state): State<AppState>, user: AuthUser) -> ApiResult<Message> {
    state.users.remove(user.id).await?;
    message("Account deleted successfully")
}
