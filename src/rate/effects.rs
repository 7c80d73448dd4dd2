use chrono::{DateTime, Duration, Utc};
use tracing::instrument;

use crate::constants::{MENTION_VALUE, REACTION_VALUE, SELF_MENTION_VALUE};
use crate::db::models::channel::Channel;
use crate::db::models::user::User;
use crate::db::{ReputationStore, StoreResult};
use crate::rate::adjust::{self, Adjustment};
use crate::rate::random::RandomSource;

/// Score changes caused by something other than the target's own message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    SelfMention,
    Mention,
    ReactionAdded,
    ReactionRemoved,
}

impl Effect {
    pub fn delta(&self) -> i64 {
        match self {
            Effect::SelfMention => SELF_MENTION_VALUE,
            Effect::Mention => MENTION_VALUE,
            Effect::ReactionAdded => REACTION_VALUE,
            Effect::ReactionRemoved => -REACTION_VALUE,
        }
    }

    /// Whether the effect is subject to the [`CooldownGate`].
    pub fn gated(&self) -> bool {
        !matches!(self, Effect::SelfMention)
    }
}

/// Suppresses repeated externally-triggered changes to the same `(user, channel)` until `window`
/// has passed since its record was last touched.
#[derive(Debug, Clone, Copy)]
pub struct CooldownGate {
    window: Duration,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Windows too large for a [`Duration`] saturate at [`Duration::MAX`].
    pub fn from_secs(secs: u64) -> Self {
        let window = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);

        Self::new(window)
    }

    pub fn is_open(&self, last_updated: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_updated {
            Some(last) => now.signed_duration_since(last) >= self.window,
            None => true,
        }
    }
}

/// Applies `effect` to `target`, returning the applied delta (`0` when suppressed).
///
/// The gate is evaluated by the store together with the write.
#[instrument(skip(store, target, channel, gate, rng), fields(user = %target.id, channel = %channel.id))]
pub async fn apply_effect<R: RandomSource + Send>(
    store: &dyn ReputationStore,
    target: &User,
    channel: &Channel,
    effect: Effect,
    at: DateTime<Utc>,
    gate: &CooldownGate,
    rng: &mut R,
) -> StoreResult<i64> {
    let gate = effect.gated().then_some(gate);

    Ok(adjust::apply(store, target, channel, effect.delta(), at, gate, rng)
        .await?
        .map(|Adjustment { applied, .. }| applied)
        .unwrap_or_default())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::flaky::FlakyStore;
    use crate::db::memory::MemoryStore;
    use crate::db::models::channel::Server;
    use crate::rate::random::FixedDraw;

    #[test]
    fn test_gate_window() {
        let gate = CooldownGate::from_secs(300);
        let now = Utc::now();

        assert!(gate.is_open(None, now));
        assert!(!gate.is_open(Some(now - Duration::seconds(299)), now));
        assert!(gate.is_open(Some(now - Duration::seconds(300)), now));
    }

    #[test]
    fn test_huge_window_saturates() {
        let gate = CooldownGate::from_secs(u64::MAX);
        let now = Utc::now();

        assert!(gate.is_open(None, now));
        assert!(!gate.is_open(Some(now - Duration::days(365 * 100)), now));
        assert!(!CooldownGate::from_secs(i64::MAX as u64).is_open(Some(now), now));
    }

    #[test]
    fn test_effect_values() {
        assert_eq!(Effect::SelfMention.delta(), -3);
        assert_eq!(Effect::Mention.delta(), 3);
        assert_eq!(Effect::ReactionAdded.delta(), 2);
        assert_eq!(Effect::ReactionRemoved.delta(), -2);
        assert!(!Effect::SelfMention.gated());
    }

    #[tokio::test]
    async fn test_self_mention_is_not_gated() {
        let store = MemoryStore::new();
        let server = Server::new("test", "guild");
        let channel = Channel::new("test", "general", &server).activated();
        store.ensure_server(&server).await.unwrap();
        store.ensure_channel(&channel).await.unwrap();

        let alice = User::new("test", "alice", "alice");
        let gate = CooldownGate::from_secs(300);
        let at = Utc::now();
        let mut rng = FixedDraw(0.99);

        for _ in 0..2 {
            let applied =
                apply_effect(&store, &alice, &channel, Effect::SelfMention, at, &gate, &mut rng)
                    .await
                    .unwrap();
            assert_eq!(applied, -3);
        }

        assert_eq!(store.score(&alice.id, &channel.id).await.unwrap(), -6);
    }

    #[tokio::test]
    async fn test_racing_mentions_pass_the_gate_once() {
        let store = FlakyStore::new().yielding();
        let server = Server::new("test", "guild");
        let channel = Channel::new("test", "general", &server).activated();
        store.ensure_server(&server).await.unwrap();
        store.ensure_channel(&channel).await.unwrap();

        let bob = User::new("test", "bob", "bob");
        let gate = CooldownGate::from_secs(300);
        let at = Utc::now();
        let (mut first_rng, mut second_rng) = (FixedDraw(0.99), FixedDraw(0.99));

        let (first, second) = tokio::join!(
            apply_effect(&store, &bob, &channel, Effect::Mention, at, &gate, &mut first_rng),
            apply_effect(
                &store,
                &bob,
                &channel,
                Effect::Mention,
                at + Duration::seconds(30),
                &gate,
                &mut second_rng,
            ),
        );

        let mut applied = [first.unwrap(), second.unwrap()];
        applied.sort_unstable();
        assert_eq!(applied, [0, 3]);
        assert_eq!(store.score(&bob.id, &channel.id).await.unwrap(), 3);
    }
}
