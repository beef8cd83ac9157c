//! Records and payload types shared by the services, plus the outbound HTTP
//! client abstraction.

pub mod api_key;
pub mod request;
pub mod user;
pub mod util;
