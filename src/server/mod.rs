//! HTTP surface.
//!
//! Every route except `/health*` lives under `/api/v1`. Handlers return
//! [envelope::Success] or [error::ApiError]; the request middleware stamps
//! each response with an `x-request-id` and gives error bodies the request
//! path.

use std::{sync::Arc, time::Instant};

use axum::{
    extract::{DefaultBodyLimit, OriginalUri},
    http::{
        header::{
            AUTHORIZATION, CONTENT_SECURITY_POLICY, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS,
            X_FRAME_OPTIONS,
        },
        HeaderName, HeaderValue, Method,
    },
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    api_keys::ApiKeysService,
    auth::AuthService,
    config::Config,
    core::util::AsyncHttpClient,
    recording::RecordingService,
    replay::Replayer,
    store::Store,
    users::UsersService,
};

pub mod envelope;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod rate_limit;

use error::ApiError;
use handlers::{api_keys, auth, health, recording, replay, users};
use rate_limit::RateLimiter;

/// Request bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const CONTENT_SECURITY: &str =
    "default-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data: https:; script-src 'self'";

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: UsersService,
    pub auth: AuthService,
    pub api_keys: ApiKeysService,
    pub recording: RecordingService,
    pub replayer: Replayer,
    pub rate_limiter: RateLimiter,
    /// Name of the storage backend, reported by `/health/info`.
    pub storage: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        storage: &'static str,
        http_client: Arc<dyn AsyncHttpClient + Send + Sync>,
    ) -> Self {
        let users = UsersService::new(store.clone(), config.auth.bcrypt_cost);
        let auth = AuthService::new(users.clone(), &config.auth);
        let api_keys = ApiKeysService::new(store.clone());
        let recording = RecordingService::new(store.clone(), api_keys.clone());
        let replayer = Replayer::new(store, api_keys.clone(), http_client);
        let rate_limiter = RateLimiter::new(&config.rate_limit);
        Self {
            config: Arc::new(config),
            users,
            auth,
            api_keys,
            recording,
            replayer,
            rate_limiter,
            storage,
            started_at: Instant::now(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/profile", get(auth::profile))
        .route("/users", post(users::create))
        .route(
            "/users/profile",
            get(users::profile)
                .patch(users::update_profile)
                .delete(users::delete_profile),
        )
        .route("/api-keys", post(api_keys::create).get(api_keys::list))
        .route("/api-keys/stats", get(api_keys::stats))
        .route(
            "/api-keys/:id",
            get(api_keys::get)
                .patch(api_keys::update)
                .delete(api_keys::remove),
        )
        .route("/api-keys/:id/deactivate", post(api_keys::deactivate))
        .route("/api-keys/:id/regenerate", post(api_keys::regenerate))
        .route("/recording", post(recording::record).get(recording::list))
        .route(
            "/recording/:id",
            get(recording::get).delete(recording::remove),
        )
        .route("/recording/apis/:api_id/requests", get(recording::requests))
        .route("/recording/apis/:api_id/stats", get(recording::stats))
        .route("/replay", post(replay::replay));

    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ping", get(health::ping))
        .route("/health/info", get(health::info))
        .nest("/api/v1", api)
        .fallback(not_found)
        .layer(from_fn_with_state(state.clone(), rate_limit::limit_requests))
        .layer(from_fn(middleware::request_context))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::not_found(format!("Cannot {method} {}", uri.path()))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    // Credentials rule out a literal `*`, so a wildcard echoes the caller.
    let allow_origin = if origins.iter().any(|origin| origin == "*") {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(exact_origins(origins))
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(extract::API_KEY_HEADER),
            middleware::REQUEST_ID,
        ])
        .allow_credentials(true)
}

fn exact_origins(origins: &[String]) -> Vec<HeaderValue> {
    origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use axum::{body::Body, http::Request};
    use tower::util::ServiceExt;

    use super::*;

    async fn allowed_origin(origins: &[&str], origin: &str) -> Option<HeaderValue> {
        let origins: Vec<String> = origins.iter().map(|o| o.to_string()).collect();
        let app: Router = Router::new()
            .route("/", get(|| async {}))
            .layer(cors_layer(&origins));
        let request = Request::builder()
            .uri("/")
            .header("origin", origin)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        response.headers().get("access-control-allow-origin").cloned()
    }

    #[tokio::test]
    async fn wildcard_origin_is_mirrored() {
        assert_eq!(
            allowed_origin(&["http://a.test", "*"], "https://b.test").await,
            Some(HeaderValue::from_static("https://b.test"))
        );
    }

    #[tokio::test]
    async fn listed_origins_only() {
        assert_eq!(
            allowed_origin(&["http://a.test"], "http://a.test").await,
            Some(HeaderValue::from_static("http://a.test"))
        );
        assert_eq!(allowed_origin(&["http://a.test"], "http://evil.test").await, None);
    }
}
