use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct UserId(pub String);

/// Base user table model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: UserId,
    pub platform_id: String,
    pub name: String,
    #[serde(default)]
    pub bot: bool,
    pub platform: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Builds a user keyed on `platform:platform_id`.
    pub fn new(platform: &str, platform_id: &str, name: &str) -> Self {
        Self {
            id: UserId::qualified(platform, platform_id),
            platform_id: platform_id.to_string(),
            name: name.to_string(),
            bot: false,
            platform: platform.to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn bot(mut self) -> Self {
        self.bot = true;
        self
    }
}

impl UserId {
    pub fn qualified(platform: &str, platform_id: &str) -> Self {
        UserId(format!("{platform}:{platform_id}"))
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId(value)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId(value.to_string())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
