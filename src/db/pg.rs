use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

use crate::db::models::channel::{Channel, ChannelId, Server};
use crate::db::models::message::Message;
use crate::db::models::reputation::{Scope, ScoreChange, Standing};
use crate::db::models::user::{User, UserId};
use crate::db::{Decide, ReputationStore, StoreResult};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Postgres-backed [`ReputationStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("postgres store ready");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Thin transaction wrapper so read-modify-write cycles commit or vanish as one.
pub struct Tx {
    inner: Option<Transaction<'static, Postgres>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct ScoreRow {
    pub score: i64,
    pub updated_at: DateTime<Utc>,
}

/// The unique constraint should make duplicate rows for a key impossible; if they do show up,
/// the most recently updated one is authoritative.
fn latest_row(rows: &[ScoreRow]) -> Option<&ScoreRow> {
    rows.iter().max_by_key(|r| r.updated_at)
}

/// FNV-1a over both ids, used as the transaction-scoped advisory lock key.
fn advisory_key(user: &UserId, channel: &ChannelId) -> i64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let user = user.to_string();
    let channel = channel.to_string();
    let bytes = user.bytes().chain([0u8]).chain(channel.bytes());

    let hash = bytes.fold(OFFSET, |hash, b| (hash ^ u64::from(b)).wrapping_mul(PRIME));
    i64::from_ne_bytes(hash.to_ne_bytes())
}

impl Tx {
    #[instrument(skip(pool))]
    pub async fn begin(pool: &PgPool) -> SqlxResult<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> SqlxResult<()> {
        match self.inner.take() {
            Some(tx) => tx.commit().await,
            None => Err(sqlx::Error::Protocol("transaction already completed".into())),
        }
    }

    fn inner_mut(&mut self) -> SqlxResult<&mut Transaction<'static, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("transaction already completed".into()))
    }

    /// Serializes every adjustment of the `(user, channel)` key until the transaction ends.
    ///
    /// `FOR UPDATE` alone locks nothing while the row doesn't exist yet, so two first events
    /// for a key would both read 0. The advisory lock covers that case too.
    #[instrument(skip(self))]
    pub async fn lock_key(&mut self, user: &UserId, channel: &ChannelId) -> SqlxResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_key(user, channel))
            .execute(&mut **self.inner_mut()?)
            .await?;

        Ok(())
    }

    /// Locks the `(user, channel)` row for the rest of the transaction and returns its score and
    /// last update, or `None` when there's no row.
    #[instrument(skip(self))]
    pub async fn locked_score(
        &mut self,
        user: &UserId,
        channel: &ChannelId,
    ) -> SqlxResult<Option<ScoreRow>> {
        let rows = sqlx::query_as::<_, ScoreRow>(
            r#"
            SELECT score, updated_at
            FROM reputation
            WHERE user_id = $1
            AND channel_id = $2
            FOR UPDATE
            "#,
        )
        .bind(user)
        .bind(channel)
        .fetch_all(&mut **self.inner_mut()?)
        .await?;

        if rows.len() > 1 {
            tracing::warn!(
                user = %user,
                channel = %channel,
                duplicates = rows.len(),
                "duplicate reputation rows, using most recently updated"
            );
        }

        Ok(latest_row(&rows).copied())
    }

    #[instrument(skip(self))]
    pub async fn add_score(
        &mut self,
        user: &UserId,
        channel: &ChannelId,
        delta: i64,
        at: DateTime<Utc>,
    ) -> SqlxResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO reputation (
                user_id,
                channel_id,
                score,
                updated_at
            )
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, channel_id)
            DO UPDATE SET
                score = reputation.score + $3,
                updated_at = $4
            RETURNING score
            "#,
        )
        .bind(user)
        .bind(channel)
        .bind(delta)
        .bind(at)
        .fetch_one(&mut **self.inner_mut()?)
        .await
    }
}

/// Builds the per-user aggregation for a scope. `$1` is bound to the scope's id when it has one.
fn ranked_query(scope: &Scope) -> String {
    let filter = match scope {
        Scope::Local(_) => "WHERE r.channel_id = $1",
        Scope::Guild(_) => "WHERE c.server_id = $1",
        Scope::Global => "",
    };

    format!(
        r#"
        SELECT
            r.user_id AS user_id,
            u.name AS name,
            SUM(r.score)::BIGINT AS score
        FROM reputation r
        JOIN chat_user u ON u.id = r.user_id
        JOIN channel c ON c.id = r.channel_id
        {filter}
        GROUP BY r.user_id, u.name
        ORDER BY score DESC, r.user_id ASC
        "#
    )
}

fn bind_scope<'q, O>(
    query: sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments>,
    scope: &'q Scope,
) -> sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments> {
    match scope {
        Scope::Local(channel) => query.bind(channel),
        Scope::Guild(server) => query.bind(server),
        Scope::Global => query,
    }
}

#[async_trait]
impl ReputationStore for PgStore {
    #[instrument(skip(self, server), fields(server = %server.id))]
    async fn ensure_server(&self, server: &Server) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO server (id, platform_id, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id)
            DO NOTHING
            "#,
        )
        .bind(&server.id)
        .bind(&server.platform_id)
        .bind(server.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, channel), fields(channel = %channel.id))]
    async fn ensure_channel(&self, channel: &Channel) -> StoreResult<Channel> {
        sqlx::query(
            r#"
            INSERT INTO channel (id, platform_id, server_id, active, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id)
            DO NOTHING
            "#,
        )
        .bind(&channel.id)
        .bind(&channel.platform_id)
        .bind(&channel.server_id)
        .bind(channel.active)
        .bind(channel.created_at)
        .execute(&self.pool)
        .await?;

        Ok(sqlx::query_as::<_, Channel>(
            "SELECT id, platform_id, server_id, active, created_at FROM channel WHERE id = $1",
        )
        .bind(&channel.id)
        .fetch_one(&self.pool)
        .await?)
    }

    #[instrument(skip(self, user), fields(user = %user.id))]
    async fn ensure_user(&self, user: &User) -> StoreResult<User> {
        Ok(sqlx::query_as::<_, User>(
            r#"
            INSERT INTO chat_user (id, platform_id, name, bot, platform, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id)
            DO UPDATE SET
                name = EXCLUDED.name
            RETURNING id, platform_id, name, bot, platform, created_at
            "#,
        )
        .bind(&user.id)
        .bind(&user.platform_id)
        .bind(&user.name)
        .bind(user.bot)
        .bind(&user.platform)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn channel(&self, id: &ChannelId) -> StoreResult<Option<Channel>> {
        Ok(sqlx::query_as::<_, Channel>(
            "SELECT id, platform_id, server_id, active, created_at FROM channel WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT id, platform_id, name, bot, platform, created_at FROM chat_user WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn set_channel_active(&self, id: &ChannelId, active: bool) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE channel SET active = $2 WHERE id = $1 AND active <> $2")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() > 0)
    }

    async fn score(&self, user: &UserId, channel: &ChannelId) -> StoreResult<i64> {
        let rows = sqlx::query_as::<_, ScoreRow>(
            r#"
            SELECT score, updated_at
            FROM reputation
            WHERE user_id = $1
            AND channel_id = $2
            "#,
        )
        .bind(user)
        .bind(channel)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() > 1 {
            tracing::warn!(user = %user, channel = %channel, "duplicate reputation rows");
        }

        Ok(latest_row(&rows).map(|r| r.score).unwrap_or_default())
    }

    async fn last_updated(
        &self,
        user: &UserId,
        channel: &ChannelId,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT MAX(updated_at)
            FROM reputation
            WHERE user_id = $1
            AND channel_id = $2
            HAVING COUNT(*) > 0
            "#,
        )
        .bind(user)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self))]
    async fn upsert_score(
        &self,
        user: &UserId,
        channel: &ChannelId,
        value: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reputation (user_id, channel_id, score, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, channel_id)
            DO UPDATE SET
                score = $3,
                updated_at = $4
            "#,
        )
        .bind(user)
        .bind(channel)
        .bind(value)
        .bind(at)
        .execute(&self.pool)
        .await?;

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
        let mut tx = Tx::begin(&self.pool).await?;
        tx.lock_key(user, channel).await?;

        let row = tx.locked_score(user, channel).await?;
        let previous = row.map(|r| r.score).unwrap_or_default();

        // dropping the transaction rolls it back and releases the lock
        let Some(delta) = decide(previous, row.map(|r| r.updated_at)) else {
            return Ok(None);
        };

        let current = tx.add_score(user, channel, delta, at).await?;
        tx.commit().await?;

        Ok(Some(ScoreChange {
            previous: current - delta,
            current,
        }))
    }

    #[instrument(skip(self))]
    async fn list_ranked(&self, scope: &Scope) -> StoreResult<Vec<Standing>> {
        let sql = ranked_query(scope);
        let query = sqlx::query_as::<_, Standing>(&sql);

        Ok(bind_scope(query, scope).fetch_all(&self.pool).await?)
    }

    #[instrument(skip(self))]
    async fn sum_non_negative(&self, scope: &Scope) -> StoreResult<i64> {
        let sql = format!(
            "SELECT COALESCE(SUM(t.score), 0)::BIGINT FROM ({}) t WHERE t.score >= 0",
            ranked_query(scope)
        );

        let total = match scope {
            Scope::Local(channel) => sqlx::query_scalar::<_, i64>(&sql).bind(channel),
            Scope::Guild(server) => sqlx::query_scalar::<_, i64>(&sql).bind(server),
            Scope::Global => sqlx::query_scalar::<_, i64>(&sql),
        }
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn preceding_message(
        &self,
        channel: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Message>> {
        Ok(sqlx::query_as::<_, Message>(
            r#"
            SELECT id, author_id, channel_id, content, sent_at
            FROM message
            WHERE channel_id = $1
            AND sent_at < $2
            ORDER BY sent_at DESC
            LIMIT 1
            "#,
        )
        .bind(channel)
        .bind(before)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn preceding_message_by(
        &self,
        author: &UserId,
        channel: &ChannelId,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<Message>> {
        Ok(sqlx::query_as::<_, Message>(
            r#"
            SELECT id, author_id, channel_id, content, sent_at
            FROM message
            WHERE author_id = $1
            AND channel_id = $2
            AND sent_at < $3
            ORDER BY sent_at DESC
            LIMIT 1
            "#,
        )
        .bind(author)
        .bind(channel)
        .bind(before)
        .fetch_optional(&self.pool)
        .await?)
    }

    #[instrument(skip(self, message), fields(channel = %message.channel_id))]
    async fn record_message(&self, message: &Message) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO message (id, author_id, channel_id, content, sent_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&message.id)
        .bind(&message.author_id)
        .bind(&message.channel_id)
        .bind(&message.content)
        .bind(message.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge(&self) -> StoreResult<()> {
        let mut tx = Tx::begin(&self.pool).await?;
        sqlx::query("TRUNCATE message, reputation, chat_user, channel, server")
            .execute(&mut **tx.inner_mut()?)
            .await?;
        tx.commit().await?;

        tracing::warn!("purged all reputation data");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::db::models::channel::ServerId;

    #[test]
    fn test_latest_row_wins_among_duplicates() {
        let now = Utc::now();
        let rows = [
            ScoreRow { score: 7, updated_at: now - Duration::minutes(3) },
            ScoreRow { score: -2, updated_at: now },
            ScoreRow { score: 40, updated_at: now - Duration::hours(1) },
        ];

        assert_eq!(latest_row(&rows).map(|r| r.score), Some(-2));
        assert_eq!(latest_row(&rows[..1]).map(|r| r.score), Some(7));
        assert_eq!(latest_row(&[]), None);
    }

    #[test]
    fn test_advisory_key_is_per_pair() {
        let alice = UserId::from("test:alice");
        let general = ChannelId::from("test:general");

        assert_eq!(advisory_key(&alice, &general), advisory_key(&alice, &general));
        assert_ne!(
            advisory_key(&alice, &general),
            advisory_key(&alice, &ChannelId::from("test:memes"))
        );
        // the separator keeps ("ab", "c") and ("a", "bc") apart
        assert_ne!(
            advisory_key(&UserId::from("ab"), &ChannelId::from("c")),
            advisory_key(&UserId::from("a"), &ChannelId::from("bc"))
        );
    }

    /// Needs a live database; skipped when `DATABASE_URL` isn't set.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_first_adjustments_for_a_key_serialize() {
        let Ok(url) = dotenvy::var("DATABASE_URL") else {
            return;
        };

        let store = std::sync::Arc::new(PgStore::connect(&url).await.unwrap());
        let tag = uuid::Uuid::new_v4().to_string();
        let server = Server::new("test", &tag);
        let channel = Channel::new("test", &tag, &server).activated();
        let user = User::new("test", &tag, "alice");

        store.ensure_server(&server).await.unwrap();
        store.ensure_channel(&channel).await.unwrap();
        store.ensure_user(&user).await.unwrap();

        let now = Utc::now();
        let handles = (0..16).map(|n| {
            let store = store.clone();
            let (user, channel) = (user.id.clone(), channel.id.clone());
            tokio::spawn(async move {
                store
                    .adjust_score(&user, &channel, now + Duration::seconds(n), &mut |_, _| Some(1))
                    .await
            })
        });

        let mut seen: Vec<i64> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|change| change.unwrap().unwrap().unwrap().previous)
            .collect();
        seen.sort_unstable();

        // every writer saw the one before it, none dampened against a phantom 0
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
        assert_eq!(store.score(&user.id, &channel.id).await.unwrap(), 16);
    }

    #[test]
    fn test_ranked_query_filters_by_scope() {
        let local = ranked_query(&Scope::Local(ChannelId::from("c")));
        let guild = ranked_query(&Scope::Guild(ServerId::from("s")));
        let global = ranked_query(&Scope::Global);

        assert!(local.contains("WHERE r.channel_id = $1"));
        assert!(guild.contains("WHERE c.server_id = $1"));
        assert!(!global.contains("WHERE"));
        assert!(global.contains("ORDER BY score DESC, r.user_id ASC"));
    }
}
