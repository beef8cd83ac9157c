use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Validate;

pub const KEY_PREFIX: &str = "cs_";
const KEY_BYTES: usize = 32;

/// A credential minted by a user for machine access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub permissions: Vec<String>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// Generates a fresh token: the `cs_` prefix followed by 64 hex characters.
pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{KEY_PREFIX}{}", hex::encode(bytes))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewApiKey {
    pub name: String,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: Option<Vec<String>>,
}

impl Validate for NewApiKey {
    fn problems(&self) -> Vec<String> {
        if self.name.trim().is_empty() {
            vec!["name must not be empty".to_string()]
        } else {
            vec![]
        }
    }
}

/// Partial update of an API key.
///
/// `expiresAt` is replaced wholesale: omitting it clears the expiry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApiKeyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

impl Validate for ApiKeyUpdate {
    fn problems(&self) -> Vec<String> {
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            vec!["name must not be empty".to_string()]
        } else {
            vec![]
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyUsageStats {
    pub total_keys: u64,
    pub total_usage: u64,
    pub active_keys: u64,
    pub expired_keys: u64,
}

impl ApiKeyUsageStats {
    pub fn collect<'a>(keys: impl IntoIterator<Item = &'a ApiKey>, now: DateTime<Utc>) -> Self {
        keys.into_iter().fold(Self::default(), |mut stats, key| {
            stats.total_keys += 1;
            stats.total_usage += key.usage_count;
            if key.is_active {
                stats.active_keys += 1;
            }
            if key.is_expired_at(now) {
                stats.expired_keys += 1;
            }
            stats
        })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use chrono::{Duration, SubsecRound};

    use super::*;

    pub(crate) fn api_key(user_id: Uuid) -> ApiKey {
        let now = Utc::now().trunc_subsecs(3);
        ApiKey {
            id: Uuid::new_v4(),
            key: generate_key(),
            name: "Test API Key".into(),
            description: None,
            is_active: true,
            expires_at: None,
            usage_count: 0,
            last_used_at: None,
            last_used_ip: None,
            permissions: vec![],
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn generated_key_format() {
        let key = generate_key();
        let hex_part = key.strip_prefix("cs_").unwrap();
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_ne!(key, generate_key());
    }

    #[test]
    fn expiry() {
        let mut key = api_key(Uuid::new_v4());
        assert!(!key.is_expired_at(Utc::now()));

        key.expires_at = Some(Utc::now() - Duration::days(1));
        assert!(key.is_expired_at(Utc::now()));

        key.expires_at = Some(Utc::now() + Duration::days(1));
        assert!(!key.is_expired_at(Utc::now()));
    }

    #[test]
    fn usage_stats() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let mut a = api_key(user);
        a.usage_count = 7;
        let mut b = api_key(user);
        b.usage_count = 3;
        b.is_active = false;
        let mut c = api_key(user);
        c.expires_at = Some(now - Duration::hours(1));

        let stats = ApiKeyUsageStats::collect([&a, &b, &c], now);
        assert_eq!(
            stats,
            ApiKeyUsageStats {
                total_keys: 3,
                total_usage: 10,
                active_keys: 2,
                expired_keys: 1,
            }
        );
    }
}
