use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::server::{
    envelope::{ok, ApiResult},
    AppState,
};

const SERVICE_NAME: &str = "Chronicle";
const DESCRIPTION: &str = "Central service for recording and replaying API requests";

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: DateTime<Utc>,
    /// Seconds since startup.
    uptime: u64,
    environment: String,
}

#[derive(Debug, Serialize)]
pub struct Pong {
    message: &'static str,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    name: &'static str,
    version: &'static str,
    description: &'static str,
    environment: String,
    platform: &'static str,
    arch: &'static str,
    storage: &'static str,
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Health> {
    ok(Health {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
        uptime: state.started_at.elapsed().as_secs(),
        environment: state.config.environment.clone(),
    })
}

pub async fn ping() -> ApiResult<Pong> {
    ok(Pong {
        message: "pong",
        timestamp: Utc::now(),
    })
}

pub async fn info(State(state): State<AppState>) -> ApiResult<ServiceInfo> {
    ok(ServiceInfo {
        name: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        description: DESCRIPTION,
        environment: state.config.environment.clone(),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        storage: state.storage,
    })
}
