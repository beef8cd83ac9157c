//! Chronicle records HTTP exchanges made against third-party APIs and replays
//! them on demand.
//!
//! A caller registers an account, mints API keys, and uses those keys to
//! upload request/response pairs captured by their own services. Any stored
//! request can later be replayed: it is re-issued live against its original
//! destination and the fresh response is returned next to what was recorded.
//!
//! # Usage
//!
//! The services are plain structs over a [`Store`] and can be used without the
//! HTTP layer:
//!
//! ```ignore
//! use std::sync::Arc;
//! use chronicle::{
//!     api_keys::ApiKeysService,
//!     config::Config,
//!     core::util::ReqwestClient,
//!     recording::RecordingService,
//!     replay::Replayer,
//!     store::MemoryStore,
//!     users::UsersService,
//! };
//!
//! let config = Config::default();
//! let store = Arc::new(MemoryStore::default());
//! let users = UsersService::new(store.clone(), config.auth.bcrypt_cost);
//! let api_keys = ApiKeysService::new(store.clone());
//! let recording = RecordingService::new(store.clone(), api_keys.clone());
//! let replayer = Replayer::new(
//!     store,
//!     api_keys.clone(),
//!     Arc::new(ReqwestClient::new(&config.http_client)?),
//! );
//!
//! let user = users.create(new_user).await?;
//! let key = api_keys.create(user.id, new_key).await?;
//! let stored = recording.record(&key, captured_exchange).await?;
//! let replayed = replayer.replay(stored.id, &key.key).await?;
//! ```
//!
//! To serve them over HTTP, build an [`AppState`] and hand
//! [`create_router`] to `axum::serve`, as the `chronicle` binary does.
//!
//! [`Store`]: crate::store::Store
//! [`AppState`]: crate::server::AppState
//! [`create_router`]: crate::server::create_router
//!
//! # Access Model
//!
//! 1. *Accounts* authenticate with email and password and receive a bearer
//!    token (see [`auth`]). Account and key management routes require it.
//! 2. *API keys* are presented in the `x-api-key` header. Recording and replay
//!    routes require one.
//! 3. A key acts for its whole account: it sees and replays requests recorded
//!    by any key of the same user, and nothing else.
//!
//! # Replay
//!
//! Replays strip `host`, `content-length`, `connection` and `x-api-key` from
//! the recorded headers, re-attach the recorded query parameters and body,
//! and issue a single call through an [`AsyncHttpClient`]. Non-2xx answers
//! are reported as-is; only transport failures are errors.
//!
//! [`AsyncHttpClient`]: crate::core::util::AsyncHttpClient

pub mod api_keys;
pub mod auth;
pub mod config;
pub mod core;
pub mod error;
pub mod recording;
pub mod replay;
pub mod server;
pub mod store;
pub mod users;

pub use error::{Error, Result};
