//! Password login and bearer tokens.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AuthConfig,
    core::user::{is_email, NewUser, User, UserProfile},
    error::{Error, Result, Validate},
    users::UsersService,
};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub user: AuthenticatedUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !is_email(&self.email) {
            problems.push("Please provide a valid email address".to_string());
        }
        if self.password.is_empty() {
            problems.push("Password is required".to_string());
        }
        problems
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: UsersService,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expires_in: i64,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("users", &self.users)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(users: UsersService, config: &AuthConfig) -> Self {
        Self {
            users,
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            expires_in: i64::try_from(config.jwt_expires_in).unwrap_or(i64::MAX),
        }
    }

    pub async fn register(&self, new_user: NewUser) -> Result<AuthResponse> {
        let created = self.users.create(new_user).await?;
        let user = self.users.find_one(created.id).await?;
        self.respond(&user)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let Some(user) = self.users.validate_user(email, password).await? else {
            warn!("rejected login attempt");
            return Err(Error::unauthorized(INVALID_CREDENTIALS));
        };
        if !user.is_active {
            warn!(user_id = %user.id, "login attempt on inactive account");
            return Err(Error::unauthorized(INVALID_CREDENTIALS));
        }
        info!(user_id = %user.id, "user logged in");
        self.respond(&user)
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<UserProfile> {
        self.users.profile(user_id).await
    }

    pub fn issue_token(&self, user: &User) -> Result<String> {
        let iat = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            iat,
            exp: iat.saturating_add(self.expires_in),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(anyhow::anyhow!("failed to sign token: {e}")))
    }

    /// Checks signature and expiry.
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| Error::unauthorized(format!("Invalid token: {e}")))
    }

    pub fn users(&self) -> &UsersService {
        &self.users
    }

    fn respond(&self, user: &User) -> Result<AuthResponse> {
        Ok(AuthResponse {
            access_token: self.issue_token(user)?,
            user: AuthenticatedUser {
                id: user.id,
                email: user.email.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                full_name: user.full_name(),
            },
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{
        core::user::UserUpdate,
        store::{MemoryStore, UserStore},
        users::test::{new_user, TEST_COST},
    };

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".into(),
            jwt_expires_in: 3600,
            bcrypt_cost: TEST_COST,
        }
    }

    fn service_with(store: Arc<MemoryStore>) -> AuthService {
        AuthService::new(UsersService::new(store, TEST_COST), &config())
    }

    #[tokio::test]
    async fn register_then_login() {
        let auth = service_with(Arc::default());
        let registered = auth.register(new_user("john@example.com")).await.unwrap();
        assert_eq!(registered.user.full_name, "John Doe");

        let claims = auth.verify_token(&registered.access_token).unwrap();
        assert_eq!(claims.sub, registered.user.id);
        assert_eq!(claims.exp - claims.iat, 3600);

        let logged_in = auth.login("john@example.com", "password123").await.unwrap();
        assert_eq!(logged_in.user, registered.user);
    }

    #[tokio::test]
    async fn bad_credentials_are_unauthorized() {
        let auth = service_with(Arc::default());
        auth.register(new_user("john@example.com")).await.unwrap();

        for (email, password) in [
            ("john@example.com", "wrong-password"),
            ("nobody@example.com", "password123"),
        ] {
            let err = auth.login(email, password).await.unwrap_err();
            assert!(matches!(err, Error::Unauthorized(ref m) if m == "Invalid credentials"));
        }
    }

    #[tokio::test]
    async fn inactive_user_cannot_login() {
        let store = Arc::new(MemoryStore::default());
        let auth = service_with(store.clone());
        let registered = auth.register(new_user("john@example.com")).await.unwrap();

        let mut user = store.get_user(registered.user.id).await.unwrap().unwrap();
        user.is_active = false;
        store.update_user(user).await.unwrap();

        assert!(matches!(
            auth.login("john@example.com", "password123").await.unwrap_err(),
            Error::Unauthorized(_)
        ));
    }

    #[tokio::test]
    async fn tokens_from_another_secret_or_expired_are_rejected() {
        let auth = service_with(Arc::default());
        let registered = auth.register(new_user("john@example.com")).await.unwrap();

        let other = AuthService::new(
            auth.users().clone(),
            &AuthConfig {
                jwt_secret: "another-secret".into(),
                ..config()
            },
        );
        assert!(other.verify_token(&registered.access_token).is_err());

        let now = Utc::now().timestamp();
        let expired = encode(
            &Header::new(Algorithm::HS256),
            &Claims {
                sub: registered.user.id,
                email: registered.user.email.clone(),
                iat: now - 7200,
                exp: now - 3600,
            },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert!(matches!(
            auth.verify_token(&expired).unwrap_err(),
            Error::Unauthorized(_)
        ));
    }

    #[tokio::test]
    async fn profile_reflects_updates() {
        let auth = service_with(Arc::default());
        let registered = auth.register(new_user("john@example.com")).await.unwrap();
        auth.users()
            .update(
                registered.user.id,
                UserUpdate {
                    last_name: Some("Roe".into()),
                    ..UserUpdate::default()
                },
            )
            .await
            .unwrap();

        let profile = auth.profile(registered.user.id).await.unwrap();
        assert_eq!(profile.user.full_name, "John Roe");
        assert!(profile.api_keys.is_empty());
    }
}
