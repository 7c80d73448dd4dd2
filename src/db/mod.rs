use core::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::models::channel::{Channel, ChannelId, Server, ServerId};
use crate::db::models::message::Message;
use crate::db::models::reputation::{Scope, ScoreChange, Standing};
use crate::db::models::user::{User, UserId};

pub mod memory;
pub mod models;
pub mod pg;

#[cfg(test)]
pub mod flaky;

pub mod prelude {
    pub use crate::db::{ReputationStore, StoreErr, StoreResult};

    pub use crate::db::memory::MemoryStore;
    pub use crate::db::pg::PgStore;

    pub use crate::db::models::channel::{Channel, ChannelId, Server, ServerId};
    pub use crate::db::models::message::Message;
    pub use crate::db::models::reputation::{ReputationRecord, Scope, ScoreChange, Standing};
    pub use crate::db::models::user::{User, UserId};
}

/// Closure handed to [`ReputationStore::adjust_score`]: receives the current score for the key and
/// when it was last changed (`None` if no record exists), and returns the delta to commit.
/// Returning `None` leaves the key untouched.
pub type Decide<'a> = &'a mut (dyn FnMut(i64, Option<DateTime<Utc>>) -> Option<i64> + Send);

/// Query contract between the scoring core and durable storage.
///
/// Aggregates (guild and global totals) are never stored, they're always derived from the
/// per-`(user, channel)` records. Implementations must make [`adjust_score`] atomic per key: the
/// read, the decision and the write are one unit, including when no record exists yet.
///
/// [`adjust_score`]: ReputationStore::adjust_score
#[async_trait]
pub trait ReputationStore: Send + Sync + fmt::Debug {
    async fn ensure_server(&self, server: &Server) -> StoreResult<()>;

    /// Creates the channel if missing and returns the stored row, whose `active` flag is
    /// authoritative over whatever the caller passed in.
    async fn ensure_channel(&self, channel: &Channel) -> StoreResult<Channel>;

    /// Creates the user if missing, refreshing the display name otherwise.
    async fn ensure_user(&self, user: &User) -> StoreResult<User>;

    async fn channel(&self, id: &ChannelId) -> StoreResult<Option<Channel>>;
    async fn user(&self, id: &UserId) -> StoreResult<Option<User>>;

    /// Returns `true` if the flag actually changed.
    async fn set_channel_active(&self, id: &ChannelId, active: bool) -> StoreResult<bool>;

    /// `0` when no record exists.
    async fn score(&self, user: &UserId, channel: &ChannelId) -> StoreResult<i64>;
    async fn last_updated(
        &self,
        user: &UserId,
        channel: &ChannelId,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Overwrites the score for the key, creating the record if needed.
    async fn upsert_score(
        &self,
        user: &UserId,
        channel: &ChannelId,
        value: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Commits the delta chosen by `decide` and stamps the record with `at`. `Ok(None)` when
    /// `decide` declined, in which case no record is created either.
    async fn adjust_score(
        &self,
        user: &UserId,
        channel: &ChannelId,
        at: DateTime<Utc>,
        decide: Decide<'_>,
    ) -> StoreResult<Option<ScoreChange>>;

    /// Per-user totals for the scope, sorted by score descending then user id ascending.
    async fn list_ranked(&self, scope: &Scope) -> StoreResult<Vec<Standing>>;

    async fn sum_non_negative(&self, scope: &Scope) -> StoreResult<i64> {
        Ok(self
            .list_ranked(scope)
            .await?
            .iter()
            .map(|s| s.score)
            .filter(|score| *score >= 0)
            .sum())
    }

    async fn sum_all(&self, scope: &Scope) -> StoreResult<i64> {
        Ok(self.list_ranked(scope).await?.iter().map(|s| s.score).sum())
    }

    async fn top_user(&self, server: &ServerId) -> StoreResult<Option<Standing>> {
        Ok(self
            .list_ranked(&Scope::Guild(server.clone()))
            .await?
            .into_iter()
            .next())
    }

    /// Every user holding at least one record in the server's channels.
    async fn server_users(&self, server: &ServerId) -> StoreResult<Vec<UserId>> {
        Ok(self
            .list_ranked(&Scope::Guild(server.clone()))
            .await?
            .into_iter()
            .map(|s| s.user_id)
            .collect())
    }

    /// Latest logged message in the channel sent strictly before `before`.
    async fn preceding_message(
        &self,
        channel: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Message>>;
    async fn preceding_message_by(
        &self,
        author: &UserId,
        channel: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Message>>;
    async fn record_message(&self, message: &Message) -> StoreResult<()>;

    /// Drops every stored entity. Irreversible.
    async fn purge(&self) -> StoreResult<()>;
}

pub type StoreResult<T> = core::result::Result<T, StoreErr>;

#[derive(Debug, Error)]
pub enum StoreErr {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("channel '{0}' references unknown server")]
    UnknownServer(ChannelId),
}
