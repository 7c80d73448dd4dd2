use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::channel::ChannelId;
use crate::db::models::user::UserId;

/// Logged chat message; only the latest per channel and per author+channel are ever read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub author_id: UserId,
    pub channel_id: ChannelId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}
