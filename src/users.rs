//! Account management.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    core::user::{NewUser, PublicUser, User, UserProfile, UserUpdate},
    error::{Error, Result, Validate},
    store::Store,
};

#[derive(Debug, Clone)]
pub struct UsersService {
    store: Arc<dyn Store>,
    bcrypt_cost: u32,
}

impl UsersService {
    pub fn new(store: Arc<dyn Store>, bcrypt_cost: u32) -> Self {
        Self { store, bcrypt_cost }
    }

    pub async fn create(&self, new_user: NewUser) -> Result<PublicUser> {
        new_user.validate()?;
        if self.store.find_user_by_email(&new_user.email).await?.is_some() {
            return Err(Error::conflict("User with this email already exists"));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new_user.email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            password_hash: hash_password(new_user.password, self.bcrypt_cost).await?,
            is_active: true,
            is_email_verified: false,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_user(user.clone()).await?;
        info!(user_id = %user.id, "created user");
        Ok(PublicUser::from(&user))
    }

    pub async fn find_all(&self) -> Result<Vec<PublicUser>> {
        let users = self.store.list_users().await?;
        Ok(users.iter().map(PublicUser::from).collect())
    }

    pub async fn find_one(&self, id: Uuid) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| Error::not_found("User not found"))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.store.find_user_by_email(email).await?)
    }

    /// The user together with every API key they own.
    pub async fn profile(&self, id: Uuid) -> Result<UserProfile> {
        let user = self.find_one(id).await?;
        let api_keys = self.store.list_keys_for_user(id).await?;
        Ok(UserProfile {
            user: PublicUser::from(&user),
            api_keys,
        })
    }

    pub async fn update(&self, id: Uuid, update: UserUpdate) -> Result<PublicUser> {
        update.validate()?;
        let mut user = self.find_one(id).await?;

        if let Some(email) = update.email {
            if email != user.email {
                if let Some(existing) = self.store.find_user_by_email(&email).await? {
                    if existing.id != id {
                        return Err(Error::conflict("User with this email already exists"));
                    }
                }
                user.email = email;
            }
        }
        if let Some(first_name) = update.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            user.last_name = last_name;
        }
        if let Some(password) = update.password {
            user.password_hash = hash_password(password, self.bcrypt_cost).await?;
        }
        user.updated_at = Utc::now();

        self.store.update_user(user.clone()).await?;
        debug!(user_id = %id, "updated user");
        Ok(PublicUser::from(&user))
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_user(id).await? {
            return Err(Error::not_found("User not found"));
        }
        info!(user_id = %id, "removed user");
        Ok(())
    }

    /// Checks a password login. Returns `None` for an unknown email or a
    /// wrong password.
    pub async fn validate_user(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(None);
        };
        let hash = user.password_hash.clone();
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .context("password check panicked")?
            // A malformed stored hash is treated as a mismatch.
            .unwrap_or(false);
        Ok(matches.then_some(user))
    }
}

async fn hash_password(password: String, cost: u32) -> Result<String> {
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .context("password hashing panicked")?
        .context("failed to hash password")?;
    Ok(hash)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::store::MemoryStore;

    /// Lowest cost bcrypt accepts.
    pub(crate) const TEST_COST: u32 = 4;

    pub(crate) fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            first_name: "John".into(),
            last_name: "Doe".into(),
            password: "password123".into(),
        }
    }

    fn service() -> UsersService {
        UsersService::new(Arc::new(MemoryStore::default()), TEST_COST)
    }

    #[tokio::test]
    async fn create_hashes_password() {
        let users = service();
        let created = users.create(new_user("john@example.com")).await.unwrap();
        assert_eq!(created.full_name, "John Doe");
        assert!(created.is_active);

        let stored = users.find_one(created.id).await.unwrap();
        assert_ne!(stored.password_hash, "password123");
        assert!(stored.password_hash.starts_with("$2"));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let users = service();
        users.create(new_user("john@example.com")).await.unwrap();
        let err = users.create(new_user("john@example.com")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected() {
        let mut payload = new_user("not-an-email");
        payload.password = "short".into();
        let err = service().create(payload).await.unwrap_err();
        let Error::Validation(problems) = err else {
            panic!("expected validation error")
        };
        assert_eq!(problems.len(), 2);
    }

    #[tokio::test]
    async fn validate_user_checks_password() {
        let users = service();
        users.create(new_user("john@example.com")).await.unwrap();

        assert!(users
            .validate_user("john@example.com", "password123")
            .await
            .unwrap()
            .is_some());
        assert!(users
            .validate_user("john@example.com", "wrong-password")
            .await
            .unwrap()
            .is_none());
        assert!(users
            .validate_user("nobody@example.com", "password123")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn update_changes_fields_and_password() {
        let users = service();
        let created = users.create(new_user("john@example.com")).await.unwrap();
        let other = users.create(new_user("jane@example.com")).await.unwrap();

        let updated = users
            .update(
                created.id,
                UserUpdate {
                    first_name: Some("Johnny".into()),
                    password: Some("new-password".into()),
                    ..UserUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.full_name, "Johnny Doe");
        assert!(users
            .validate_user("john@example.com", "new-password")
            .await
            .unwrap()
            .is_some());

        let err = users
            .update(
                created.id,
                UserUpdate {
                    email: Some(other.email),
                    ..UserUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn remove_then_find_is_not_found() {
        let users = service();
        let created = users.create(new_user("john@example.com")).await.unwrap();
        users.remove(created.id).await.unwrap();
        assert!(matches!(
            users.find_one(created.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            users.remove(created.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
