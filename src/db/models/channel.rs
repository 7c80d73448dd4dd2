use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct ChannelId(pub String);

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct ServerId(pub String);

/// Base server table model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Server {
    pub id: ServerId,
    pub platform_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Base channel table model
///
/// `active` gates scoring: messages in an inactive channel are still logged but never rated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Channel {
    pub id: ChannelId,
    pub platform_id: String,
    pub server_id: ServerId,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Server {
    pub fn new(platform: &str, platform_id: &str) -> Self {
        Self {
            id: ServerId(format!("{platform}:{platform_id}")),
            platform_id: platform_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

impl Channel {
    pub fn new(platform: &str, platform_id: &str, server: &Server) -> Self {
        Self {
            id: ChannelId(format!("{platform}:{platform_id}")),
            platform_id: platform_id.to_string(),
            server_id: server.id.clone(),
            active: false,
            created_at: Utc::now(),
        }
    }

    pub fn activated(mut self) -> Self {
        self.active = true;
        self
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        ChannelId(value)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        ChannelId(value.to_string())
    }
}

impl From<&str> for ServerId {
    fn from(value: &str) -> Self {
        ServerId(value.to_string())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
