//! Request extractors: bearer and API key authentication, validated JSON
//! bodies and id path segments.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequest, FromRequestParts, Path, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use super::{error::ApiError, AppState};
use crate::{core::api_key::ApiKey, error::Validate};

pub const API_KEY_HEADER: &str = "x-api-key";

/// The user behind a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;
        let claims = state.auth.verify_token(token).map_err(|e| {
            debug!("rejected bearer token: {e}");
            ApiError::unauthorized("Unauthorized")
        })?;
        Ok(Self {
            id: claims.sub,
            email: claims.email,
        })
    }
}

/// The raw `x-api-key` header. Nothing is checked beyond its presence.
#[derive(Debug, Clone)]
pub struct PresentedKey(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for PresentedKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, ApiError> {
        parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .ok_or_else(|| ApiError::unauthorized("API key is required"))
    }
}

/// A usable API key from `x-api-key`. Extracting it counts as a use.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth(pub ApiKey);

#[async_trait]
impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let PresentedKey(token) = PresentedKey::from_request_parts(parts, state).await?;
        let ip = client_ip(parts);
        state
            .api_keys
            .validate_api_key(&token, ip.as_deref())
            .await?
            .map(Self)
            .ok_or_else(|| ApiError::unauthorized("Invalid API key"))
    }
}

/// A JSON body that passed [Validate].
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, ApiError> {
        let Json(value) = Json::<T>::from_request(request, state).await?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// A UUID path segment, rejected with 400 when malformed.
#[derive(Debug, Clone, Copy)]
pub struct IdParam(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for IdParam {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, ApiError> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state).await?;
        Ok(Self(id))
    }
}

/// First `x-forwarded-for` hop, falling back to the peer address.
pub fn client_ip(parts: &Parts) -> Option<String> {
    forwarded_for(&parts.headers).or_else(|| {
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    })
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}
