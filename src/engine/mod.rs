//! Event pipeline: turns one inbound platform event into store mutations.
//!
//! The engine itself holds no mutable state. Everything it needs to decide on a delta is read
//! from the store, and every mutation goes through [`adjust::apply`], which the store executes
//! atomically per `(user, channel)`. This is what lets [`worker::Dispatcher`] run any number of
//! events concurrently.
//!
//! A message can touch several keys, each committed on its own. If a later step fails, the
//! earlier commits stand and are reported through [`EngineErr::Partial`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::db::models::channel::{Channel, ChannelId, Server, ServerId};
use crate::db::models::message::Message;
use crate::db::models::reputation::Scope;
use crate::db::models::user::{User, UserId};
use crate::db::{ReputationStore, StoreErr};
use crate::rank::{self, Standings};
use crate::rate::adjust;
use crate::rate::prelude::{CooldownGate, Effect, RandomSource, RuleInput, apply_effect};
use crate::rate::rules;

pub mod worker;


/// Inbound events, as handed over by a platform transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MessageCreated(MessageEvent),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: String,
    pub author: User,
    pub channel: Channel,
    pub server: Server,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub mentions: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub reactor: User,
    /// Author of the message that was reacted to.
    pub target_author: User,
    pub channel: Channel,
    pub server: Server,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::MessageCreated(_) => "message_created",
            Event::ReactionAdded(_) => "reaction_added",
            Event::ReactionRemoved(_) => "reaction_removed",
        }
    }

    pub fn server_id(&self) -> &ServerId {
        match self {
            Event::MessageCreated(m) => &m.server.id,
            Event::ReactionAdded(r) | Event::ReactionRemoved(r) => &r.server.id,
        }
    }
}

/// A committed score change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub user: UserId,
    pub applied: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub changes: Vec<Change>,
    /// Server whose tiers need re-syncing, set whenever something was committed.
    pub sync: Option<ServerId>,
}

impl Outcome {
    fn push(&mut self, user: &UserId, applied: i64) {
        self.changes.push(Change {
            user: user.clone(),
            applied,
        });
    }

    fn finish(mut self, server: &ServerId) -> Self {
        if !self.changes.is_empty() {
            self.sync = Some(server.clone());
        }
        self
    }

    pub fn applied_to(&self, user: &UserId) -> i64 {
        self.changes
            .iter()
            .filter(|c| &c.user == user)
            .map(|c| c.applied)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    store: Arc<dyn ReputationStore>,
    gate: CooldownGate,
    leaderboard_size: usize,
}

impl Engine {
    pub fn new(store: Arc<dyn ReputationStore>, gate: CooldownGate, leaderboard_size: usize) -> Self {
        Self {
            store,
            gate,
            leaderboard_size,
        }
    }

    #[instrument(skip_all, fields(kind = event.kind(), server = %event.server_id()))]
    pub async fn handle<R: RandomSource + Send>(
        &self,
        event: &Event,
        rng: &mut R,
    ) -> EngineResult<Outcome> {
        match event {
            Event::MessageCreated(message) => self.on_message(message, rng).await,
            Event::ReactionAdded(reaction) => {
                self.on_reaction(reaction, Effect::ReactionAdded, rng).await
            }
            Event::ReactionRemoved(reaction) => {
                self.on_reaction(reaction, Effect::ReactionRemoved, rng).await
            }
        }
    }

    async fn on_message<R: RandomSource + Send>(
        &self,
        event: &MessageEvent,
        rng: &mut R,
    ) -> EngineResult<Outcome> {
        if event.author.bot {
            tracing::trace!(author = %event.author.id, "ignoring bot message");
            return Ok(Outcome::default());
        }

        let channel = self.ensure_location(&event.server, &event.channel).await?;
        let author = self.store.ensure_user(&event.author).await?;

        let message = Message {
            id: event.id.clone(),
            author_id: author.id.clone(),
            channel_id: channel.id.clone(),
            content: event.content.clone(),
            sent_at: event.sent_at,
        };

        let mut outcome = Outcome::default();
        let scored = if channel.active {
            self.score_message(&message, &author, &channel, &event.mentions, rng, &mut outcome)
                .await
        } else {
            Ok(())
        };

        // logged even if scoring stopped halfway, so the next message still sees this one
        let logged = self.store.record_message(&message).await.map_err(EngineErr::from);

        let outcome = outcome.finish(&channel.server_id);
        match scored.and(logged) {
            Ok(()) => Ok(outcome),
            Err(e) if outcome.changes.is_empty() => Err(e),
            Err(e) => Err(EngineErr::Partial {
                outcome,
                source: Box::new(e),
            }),
        }
    }

    async fn score_message<R: RandomSource + Send>(
        &self,
        message: &Message,
        author: &User,
        channel: &Channel,
        mentions: &[User],
        rng: &mut R,
        outcome: &mut Outcome,
    ) -> EngineResult<()> {
        let preceding = self
            .store
            .preceding_message(&channel.id, message.sent_at)
            .await?;
        let preceding_by_author = self
            .store
            .preceding_message_by(&author.id, &channel.id, message.sent_at)
            .await?;

        let breakdown = rules::breakdown(&RuleInput {
            message,
            preceding: preceding.as_ref(),
            preceding_by_author: preceding_by_author.as_ref(),
        });
        tracing::debug!(?breakdown, total = breakdown.total(), "rated message");

        if let Some(adjustment) = adjust::apply(
            self.store.as_ref(),
            author,
            channel,
            breakdown.total(),
            message.sent_at,
            None,
            rng,
        )
        .await?
        {
            outcome.push(&author.id, adjustment.applied);
        }

        let mut seen = HashSet::new();
        for mentioned in mentions {
            if mentioned.bot || !seen.insert(&mentioned.id) {
                continue;
            }

            let (target, effect) = if mentioned.id == author.id {
                (author.clone(), Effect::SelfMention)
            } else {
                (self.store.ensure_user(mentioned).await?, Effect::Mention)
            };

            let applied = apply_effect(
                self.store.as_ref(),
                &target,
                channel,
                effect,
                message.sent_at,
                &self.gate,
                rng,
            )
            .await?;

            if applied != 0 {
                outcome.push(&target.id, applied);
            }
        }

        Ok(())
    }

    async fn on_reaction<R: RandomSource + Send>(
        &self,
        event: &ReactionEvent,
        effect: Effect,
        rng: &mut R,
    ) -> EngineResult<Outcome> {
        if event.reactor.bot || event.target_author.bot {
            tracing::trace!("ignoring reaction involving a bot");
            return Ok(Outcome::default());
        }
        if event.reactor.id == event.target_author.id {
            tracing::trace!(user = %event.reactor.id, "ignoring self-reaction");
            return Ok(Outcome::default());
        }

        let channel = self.ensure_location(&event.server, &event.channel).await?;
        if !channel.active {
            return Ok(Outcome::default());
        }

        self.store.ensure_user(&event.reactor).await?;
        let target = self.store.ensure_user(&event.target_author).await?;

        let mut outcome = Outcome::default();
        let applied = apply_effect(
            self.store.as_ref(),
            &target,
            &channel,
            effect,
            event.at,
            &self.gate,
            rng,
        )
        .await?;

        if applied != 0 {
            outcome.push(&target.id, applied);
        }

        Ok(outcome.finish(&channel.server_id))
    }

    /// Lazily creates the server and channel, returning the stored channel.
    async fn ensure_location(&self, server: &Server, channel: &Channel) -> EngineResult<Channel> {
        self.store.ensure_server(server).await?;
        Ok(self.store.ensure_channel(channel).await?)
    }

    #[instrument(skip(self))]
    pub async fn set_channel_active(&self, channel: &ChannelId, active: bool) -> EngineResult<bool> {
        let changed = self.store.set_channel_active(channel, active).await?;
        if changed {
            tracing::info!(%channel, active, "channel activation changed");
        }

        Ok(changed)
    }

    pub async fn standings(&self, scope: &Scope) -> EngineResult<Standings> {
        Ok(rank::rank(self.store.as_ref(), scope, self.leaderboard_size).await?)
    }

    #[instrument(skip(self))]
    pub async fn purge(&self) -> EngineResult<()> {
        tracing::warn!("purging all reputation data");
        Ok(self.store.purge().await?)
    }
}

pub type EngineResult<T> = core::result::Result<T, EngineErr>;

#[derive(Debug, Error)]
pub enum EngineErr {
    #[error(transparent)]
    Store(#[from] StoreErr),

    #[error("event queue is closed")]
    QueueClosed,

    /// Some changes were committed before `source` stopped the event. They stay committed, and
    /// `outcome` lists them.
    #[error("event partially applied: {source}")]
    Partial {
        outcome: Outcome,
        source: Box<EngineErr>,
    },
}

impl EngineErr {
    /// Changes that made it into the store despite the error.
    pub fn committed(&self) -> Option<&Outcome> {
        match self {
            EngineErr::Partial { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}
