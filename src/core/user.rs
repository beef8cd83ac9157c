use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Validate;

use super::api_key::ApiKey;

pub const MIN_PASSWORD_LEN: usize = 8;

/// An account as persisted. The password hash never leaves the crate through
/// serialization; use [PublicUser] for responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name(),
            is_active: user.is_active,
            is_email_verified: user.is_email_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// A user together with the API keys they own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: PublicUser,
    pub api_keys: Vec<ApiKey>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

impl Validate for NewUser {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !is_email(&self.email) {
            problems.push("Please provide a valid email address".to_string());
        }
        if self.first_name.trim().is_empty() {
            problems.push("First name is required".to_string());
        }
        if self.last_name.trim().is_empty() {
            problems.push("Last name is required".to_string());
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            problems.push(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters long"
            ));
        }
        problems
    }
}

/// Partial update of a user. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
}

impl Validate for UserUpdate {
    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if matches!(&self.email, Some(email) if !is_email(email)) {
            problems.push("Please provide a valid email address".to_string());
        }
        if matches!(&self.first_name, Some(name) if name.trim().is_empty()) {
            problems.push("First name must not be empty".to_string());
        }
        if matches!(&self.last_name, Some(name) if name.trim().is_empty()) {
            problems.push("Last name must not be empty".to_string());
        }
        if matches!(&self.password, Some(password) if password.chars().count() < MIN_PASSWORD_LEN)
        {
            problems.push(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters long"
            ));
        }
        problems
    }
}

/// Loose shape check: one `@`, non-empty local part, and a dotted domain.
pub fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}
