use std::time::Duration;

use serde::Deserialize;

/// Runtime settings shared by the services and the HTTP layer.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// Deployment name reported by the health endpoints.
    pub environment: String,
    pub auth: AuthConfig,
    pub http_client: HttpClientConfig,
    pub rate_limit: RateLimitConfig,
    /// Origins allowed by CORS. Empty means any origin, as does `*`.
    pub allowed_origins: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Access token lifetime in seconds.
    pub jwt_expires_in: u64,
    pub bcrypt_cost: u32,
}

/// Settings for the outbound client used by replays.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HttpClientConfig {
    pub timeout_ms: u64,
    pub max_redirects: usize,
    pub max_response_bytes: usize,
    pub user_agent: String,
}

/// Per client address, fixed window.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window. Zero turns limiting off.
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}

impl HttpClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            auth: AuthConfig::default(),
            http_client: HttpClientConfig::default(),
            rate_limit: RateLimitConfig::default(),
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expires_in: 24 * 60 * 60,
            bcrypt_cost: 10,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_redirects: 5,
            max_response_bytes: 50 * 1024 * 1024,
            user_agent: "Chronicle-API/1.0.0".to_string(),
        }
    }
}

/// Splits a comma separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
