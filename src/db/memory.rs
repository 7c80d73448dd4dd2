use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::db::models::channel::{Channel, ChannelId, Server, ServerId};
use crate::db::models::message::Message;
use crate::db::models::reputation::{ReputationRecord, Scope, ScoreChange, Standing};
use crate::db::models::user::{User, UserId};
use crate::db::{Decide, ReputationStore, StoreErr, StoreResult};

/// Process-local store, used when no database is configured and throughout the tests.
///
/// A single lock guards every table, so `adjust_score` is trivially atomic per key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    servers: HashMap<ServerId, Server>,
    channels: HashMap<ChannelId, Channel>,
    users: HashMap<UserId, User>,
    records: HashMap<(UserId, ChannelId), ReputationRecord>,
    messages: HashMap<ChannelId, Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reputation records held for `user` across all channels.
    pub async fn record_count(&self, user: &UserId) -> usize {
        self.tables
            .read()
            .await
            .records
            .keys()
            .filter(|(u, _)| u == user)
            .count()
    }
}

impl Tables {
    fn in_scope(&self, record: &ReputationRecord, scope: &Scope) -> bool {
        match scope {
            Scope::Local(channel) => &record.channel_id == channel,
            Scope::Guild(server) => self
                .channels
                .get(&record.channel_id)
                .is_some_and(|ch| &ch.server_id == server),
            Scope::Global => true,
        }
    }

    /// Events can arrive out of order, so the log is searched by timestamp rather than by
    /// insertion order.
    fn latest_before(
        &self,
        channel: &ChannelId,
        before: DateTime<Utc>,
        author: Option<&UserId>,
    ) -> Option<Message> {
        self.messages
            .get(channel)?
            .iter()
            .filter(|m| m.sent_at < before)
            .filter(|m| author.is_none_or(|a| &m.author_id == a))
            .max_by_key(|m| m.sent_at)
            .cloned()
    }

    fn display_name(&self, user: &UserId) -> String {
        self.users
            .get(user)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| user.to_string())
    }
}

#[async_trait]
impl ReputationStore for MemoryStore {
    async fn ensure_server(&self, server: &Server) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .servers
            .entry(server.id.clone())
            .or_insert_with(|| server.clone());

        Ok(())
    }

    async fn ensure_channel(&self, channel: &Channel) -> StoreResult<Channel> {
        let mut tables = self.tables.write().await;
        if !tables.servers.contains_key(&channel.server_id) {
            return Err(StoreErr::UnknownServer(channel.id.clone()));
        }

        Ok(tables
            .channels
            .entry(channel.id.clone())
            .or_insert_with(|| channel.clone())
            .clone())
    }

    async fn ensure_user(&self, user: &User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .users
            .entry(user.id.clone())
            .and_modify(|u| u.name = user.name.clone())
            .or_insert_with(|| user.clone());

        Ok(stored.clone())
    }

    async fn channel(&self, id: &ChannelId) -> StoreResult<Option<Channel>> {
        Ok(self.tables.read().await.channels.get(id).cloned())
    }

    async fn user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(id).cloned())
    }

    async fn set_channel_active(&self, id: &ChannelId, active: bool) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.channels.get_mut(id) {
            Some(ch) if ch.active != active => {
                ch.active = active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn score(&self, user: &UserId, channel: &ChannelId) -> StoreResult<i64> {
        Ok(self
            .tables
            .read()
            .await
            .records
            .get(&(user.clone(), channel.clone()))
            .map(|r| r.score)
            .unwrap_or_default())
    }

    async fn last_updated(
        &self,
        user: &UserId,
        channel: &ChannelId,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .tables
            .read()
            .await
            .records
            .get(&(user.clone(), channel.clone()))
            .map(|r| r.updated_at))
    }

    async fn upsert_score(
        &self,
        user: &UserId,
        channel: &ChannelId,
        value: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.records.insert(
            (user.clone(), channel.clone()),
            ReputationRecord {
                user_id: user.clone(),
                channel_id: channel.clone(),
                score: value,
                updated_at: at,
            },
        );

        Ok(())
    }

    #[instrument(skip(self, decide))]
    async fn adjust_score(
        &self,
        user: &UserId,
        channel: &ChannelId,
        at: DateTime<Utc>,
        decide: Decide<'_>,
    ) -> StoreResult<Option<ScoreChange>> {
        let mut tables = self.tables.write().await;
        let key = (user.clone(), channel.clone());

        let existing = tables.records.get(&key);
        let previous = existing.map(|r| r.score).unwrap_or_default();
        let Some(delta) = decide(previous, existing.map(|r| r.updated_at)) else {
            return Ok(None);
        };

        let record = tables.records.entry(key).or_insert_with(|| ReputationRecord {
            user_id: user.clone(),
            channel_id: channel.clone(),
            score: 0,
            updated_at: at,
        });
        record.score += delta;
        record.updated_at = at;

        Ok(Some(ScoreChange {
            previous,
            current: record.score,
        }))
    }

    async fn list_ranked(&self, scope: &Scope) -> StoreResult<Vec<Standing>> {
        let tables = self.tables.read().await;

        let mut totals: HashMap<&UserId, i64> = HashMap::new();
        for record in tables.records.values() {
            if tables.in_scope(record, scope) {
                *totals.entry(&record.user_id).or_default() += record.score;
            }
        }

        let mut ranked: Vec<Standing> = totals
            .into_iter()
            .map(|(id, score)| Standing {
                user_id: id.clone(),
                name: tables.display_name(id),
                score,
            })
            .collect();

        ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(ranked)
    }

    async fn preceding_message(
        &self,
        channel: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Message>> {
        Ok(self.tables.read().await.latest_before(channel, before, None))
    }

    async fn preceding_message_by(
        &self,
        author: &UserId,
        channel: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Message>> {
        Ok(self
            .tables
            .read()
            .await
            .latest_before(channel, before, Some(author)))
    }

    async fn record_message(&self, message: &Message) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .messages
            .entry(message.channel_id.clone())
            .or_default()
            .push(message.clone());

        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge(&self) -> StoreResult<()> {
        *self.tables.write().await = Tables::default();
        tracing::warn!("purged all in-memory reputation data");

        Ok(())
    }
}
