use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Context};
use chronicle::{
    config::{parse_origins, AuthConfig, Config, HttpClientConfig, RateLimitConfig},
    core::util::ReqwestClient,
    server::{create_router, AppState},
    store::{MemoryStore, Store},
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MEMORY_DATABASE: &str = "memory";

#[derive(Parser, Debug)]
#[command(name = "chronicle")]
#[command(about = "Record HTTP exchanges against third-party APIs and replay them")]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "3000", env = "PORT")]
    port: u16,

    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// SQLite database file, or `memory` to keep everything in process
    #[arg(long, default_value = "chronicle.db", env = "DATABASE")]
    database: String,

    /// Secret used to sign access tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, default_value = "86400", env = "JWT_EXPIRES_IN")]
    jwt_expires_in: u64,

    /// Comma separated list of origins allowed by CORS
    #[arg(long, default_value = "http://localhost:3001", env = "ALLOWED_ORIGINS")]
    allowed_origins: String,

    /// Deployment name reported by the health endpoints
    #[arg(long, default_value = "development", env = "APP_ENV")]
    environment: String,

    /// bcrypt work factor for password hashes
    #[arg(long, default_value = "10", env = "BCRYPT_COST")]
    bcrypt_cost: u32,

    /// Requests allowed per client address and window (0 disables limiting)
    #[arg(long, default_value = "100", env = "RATE_LIMIT_MAX")]
    rate_limit_max: u32,

    /// Rate limit window in seconds
    #[arg(long, default_value = "60", env = "RATE_LIMIT_WINDOW")]
    rate_limit_window: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level)?;

    let Some(jwt_secret) = cli.jwt_secret.clone().filter(|s| !s.is_empty()) else {
        bail!("JWT_SECRET must be set (flag --jwt-secret or environment variable)");
    };

    let config = Config {
        environment: cli.environment.clone(),
        auth: AuthConfig {
            jwt_secret,
            jwt_expires_in: cli.jwt_expires_in,
            bcrypt_cost: cli.bcrypt_cost,
        },
        http_client: HttpClientConfig::default(),
        rate_limit: RateLimitConfig {
            max_requests: cli.rate_limit_max,
            window_secs: cli.rate_limit_window,
        },
        allowed_origins: parse_origins(&cli.allowed_origins),
    };

    let (store, storage) = open_store(&cli.database)?;
    let http_client = Arc::new(ReqwestClient::new(&config.http_client)?);

    let state = AppState::new(config, store, storage, http_client);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);
    info!(storage, environment = %cli.environment, "chronicle ready");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

#[cfg(feature = "sqlite")]
fn open_store(database: &str) -> anyhow::Result<(Arc<dyn Store>, &'static str)> {
    if database == MEMORY_DATABASE {
        return Ok((Arc::new(MemoryStore::default()), "memory"));
    }
    let store = chronicle::store::SqliteStore::open(database)?;
    info!(path = database, "opened sqlite database");
    Ok((Arc::new(store), "sqlite"))
}

#[cfg(not(feature = "sqlite"))]
fn open_store(database: &str) -> anyhow::Result<(Arc<dyn Store>, &'static str)> {
    if database != MEMORY_DATABASE {
        warn!(
            database,
            "built without the `sqlite` feature; data will not be persisted"
        );
    }
    Ok((Arc::new(MemoryStore::default()), "memory"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Setup tracing subscriber for logging
fn setup_logging(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower_http=info".parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
    Ok(())
}
