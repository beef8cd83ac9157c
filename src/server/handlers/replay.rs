use axum::extract::State;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    error::Validate,
    replay::ReplayResult,
    server::{
        envelope::{created, ApiResult},
        extract::{PresentedKey, ValidJson},
        AppState,
    },
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayBody {
    /// Id of the stored request.
    pub id: Uuid,
}

impl Validate for ReplayBody {
    fn problems(&self) -> Vec<String> {
        vec![]
    }
}

#[instrument(skip_all, fields(request_id = %body.id))]
pub async fn replay(
    State(state): State<AppState>,
    PresentedKey(key): PresentedKey,
    ValidJson(body): ValidJson<ReplayBody>,
) -> ApiResult<ReplayResult> {
    created(state.replayer.replay(body.id, &key).await?)
}
