#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    body::{to_bytes, Body},
    extract::Query,
    http::{HeaderMap, Request, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chronicle::{
    config::Config,
    core::util::ReqwestClient,
    server::{create_router, AppState},
    store::MemoryStore,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    /// The `data` member of a success envelope.
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }
}

pub fn app() -> Router {
    app_with(config())
}

/// Defaults suitable for tests: fixed secret, cheap password hashing.
pub fn config() -> Config {
    let mut config = Config::default();
    config.auth.jwt_secret = "integration-secret".into();
    config.auth.bcrypt_cost = 4;
    config
}

pub fn app_with(config: Config) -> Router {
    let client = Arc::new(ReqwestClient::new(&config.http_client).unwrap());
    create_router(AppState::new(
        config,
        Arc::new(MemoryStore::default()),
        "memory",
        client,
    ))
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply {
        status,
        headers,
        body,
    }
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Registers an account and returns its access token.
pub async fn register(app: &Router, email: &str) -> String {
    let reply = send(
        app,
        "POST",
        "/api/v1/auth/register",
        &[],
        Some(json!({
            "email": email,
            "firstName": "John",
            "lastName": "Doe",
            "password": "password123"
        })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    reply.data()["access_token"].as_str().unwrap().to_string()
}

/// Mints an API key for the account behind `token` and returns the key.
pub async fn api_key(app: &Router, token: &str) -> String {
    let auth = bearer(token);
    let reply = send(
        app,
        "POST",
        "/api/v1/api-keys",
        &[("authorization", auth.as_str())],
        Some(json!({ "name": "Integration key" })),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
    reply.data()["key"].as_str().unwrap().to_string()
}

/// A stand-in third-party API that echoes what it receives.
pub async fn upstream() -> SocketAddr {
    let app = Router::new()
        .route(
            "/v1/items",
            post(
                |headers: HeaderMap, Query(query): Query<HashMap<String, String>>, body: String| async move {
                    Json(json!({
                        "body": body,
                        "page": query.get("page"),
                        "authorization": headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok()),
                        "sawApiKey": headers.contains_key("x-api-key"),
                    }))
                },
            ),
        )
        .route("/text", get(|| async { "plain text" }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
