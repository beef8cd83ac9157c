pub mod api_keys;
pub mod auth;
pub mod health;
pub mod recording;
pub mod replay;
pub mod users;
