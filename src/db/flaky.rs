//! Test store that behaves like [`MemoryStore`] but can stall or fail on demand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::memory::MemoryStore;
use crate::db::models::channel::{Channel, ChannelId, Server};
use crate::db::models::message::Message;
use crate::db::models::reputation::{Scope, ScoreChange, Standing};
use crate::db::models::user::{User, UserId};
use crate::db::{Decide, ReputationStore, StoreErr, StoreResult};

#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Hand control back to the runtime before every score read or write, the way a network
    /// round trip would.
    yielding: bool,
    fail_record_message: bool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    pub fn failing_record_message(mut self) -> Self {
        self.fail_record_message = true;
        self
    }

    async fn io(&self) {
        if self.yielding {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl ReputationStore for FlakyStore {
    async fn ensure_server(&self, server: &Server) -> StoreResult<()> {
        self.inner.ensure_server(server).await
    }

    async fn ensure_channel(&self, channel: &Channel) -> StoreResult<Channel> {
        self.inner.ensure_channel(channel).await
    }

    async fn ensure_user(&self, user: &User) -> StoreResult<User> {
        self.inner.ensure_user(user).await
    }

    async fn channel(&self, id: &ChannelId) -> StoreResult<Option<Channel>> {
        self.inner.channel(id).await
    }

    async fn user(&self, id: &UserId) -> StoreResult<Option<User>> {
        self.inner.user(id).await
    }

    async fn set_channel_active(&self, id: &ChannelId, active: bool) -> StoreResult<bool> {
        self.inner.set_channel_active(id, active).await
    }

    async fn score(&self, user: &UserId, channel: &ChannelId) -> StoreResult<i64> {
        self.io().await;
        self.inner.score(user, channel).await
    }

    async fn last_updated(
        &self,
        user: &UserId,
        channel: &ChannelId,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.io().await;
        self.inner.last_updated(user, channel).await
    }

    async fn upsert_score(
        &self,
        user: &UserId,
        channel: &ChannelId,
        value: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.io().await;
        self.inner.upsert_score(user, channel, value, at).await
    }

    async fn adjust_score(
        &self,
        user: &UserId,
        channel: &ChannelId,
        at: DateTime<Utc>,
        decide: Decide<'_>,
    ) -> StoreResult<Option<ScoreChange>> {
        self.io().await;
        self.inner.adjust_score(user, channel, at, decide).await
    }

    async fn list_ranked(&self, scope: &Scope) -> StoreResult<Vec<Standing>> {
        self.io().await;
        self.inner.list_ranked(scope).await
    }

    async fn sum_non_negative(&self, scope: &Scope) -> StoreResult<i64> {
        self.io().await;
        self.inner.sum_non_negative(scope).await
    }

    async fn preceding_message(
        &self,
        channel: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Message>> {
        self.inner.preceding_message(channel, before).await
    }

    async fn preceding_message_by(
        &self,
        author: &UserId,
        channel: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Message>> {
        self.inner.preceding_message_by(author, channel, before).await
    }

    async fn record_message(&self, message: &Message) -> StoreResult<()> {
        if self.fail_record_message {
            return Err(StoreErr::SqlxError(sqlx::Error::PoolTimedOut));
        }
        self.inner.record_message(message).await
    }

    async fn purge(&self) -> StoreResult<()> {
        self.inner.purge().await
    }
}
