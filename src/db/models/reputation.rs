use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::channel::{ChannelId, ServerId};
use crate::db::models::user::UserId;

/// One row per `(user, channel)`; the pair is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReputationRecord {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub score: i64,
    pub updated_at: DateTime<Utc>,
}

/// A user's (possibly aggregated) score within some [`Scope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Standing {
    pub user_id: UserId,
    pub name: String,
    pub score: i64,
}

/// Breadth of aggregation for rankings and pool totals
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Local(ChannelId),
    Guild(ServerId),
    Global,
}

/// Score before and after a committed read-modify-write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreChange {
    pub previous: i64,
    pub current: i64,
}

impl ScoreChange {
    pub fn applied(&self) -> i64 {
        self.current - self.previous
    }
}

impl Standing {
    pub fn new(user_id: impl Into<UserId>, name: &str, score: i64) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.to_string(),
            score,
        }
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scope::Local(id) => write!(f, "local:{id}"),
            Scope::Guild(id) => write!(f, "guild:{id}"),
            Scope::Global => write!(f, "global"),
        }
    }
}
