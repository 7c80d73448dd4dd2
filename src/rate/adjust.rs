//! Dampening: turns a proposed delta into the delta that actually gets committed.
//!
//! The magnitude is never changed, only the sign. The bigger a user's score is relative to the
//! pool, the more likely a change gets inverted, which keeps runaway leaders (and losers) in
//! check without a hard cap.

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::constants::{CAP_FLOOR, FLIP_CEILING, FLIP_FLOOR, FLIP_SCALE};
use crate::db::models::channel::Channel;
use crate::db::models::reputation::Scope;
use crate::db::models::user::User;
use crate::db::{ReputationStore, StoreResult};
use crate::rate::effects::CooldownGate;
use crate::rate::random::RandomSource;

/// Which side of zero a score ended up on after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Unchanged,
    BecameNegative,
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    pub proposed: i64,
    pub applied: i64,
    pub previous: i64,
    pub current: i64,
}

impl Adjustment {
    pub fn polarity(&self) -> Polarity {
        if self.previous >= 0 && self.current < 0 {
            Polarity::BecameNegative
        } else if self.previous < 0 && self.current >= 0 {
            Polarity::Recovered
        } else {
            Polarity::Unchanged
        }
    }

    pub fn flipped(&self) -> bool {
        self.applied != self.proposed
    }
}

/// `max(100, floor(2/3 * pool_total))`
pub fn cap(pool_total: i64) -> i64 {
    CAP_FLOOR.max((pool_total * 2).div_euclid(3))
}

/// Probability that `delta` gets its sign inverted for a user currently at `current`.
///
/// `None` means no dampening applies at all (empty score or empty pool).
pub fn flip_probability(current: i64, delta: i64, pool_total: i64) -> Option<f64> {
    if current == 0 || pool_total == 0 {
        return None;
    }

    let magnitude = current.unsigned_abs() as f64;
    let p = magnitude * (1.0 + magnitude).ln() / pool_total.unsigned_abs() as f64 * FLIP_SCALE;

    let reversal = delta != 0 && delta.signum() != current.signum();
    if current.unsigned_abs() > cap(pool_total).unsigned_abs() && reversal {
        return Some(FLIP_FLOOR);
    }

    Some(p.clamp(FLIP_FLOOR, FLIP_CEILING))
}

/// Returns either `delta` or `-delta`.
pub fn dampen<R: RandomSource + ?Sized>(
    current: i64,
    delta: i64,
    pool_total: i64,
    rng: &mut R,
) -> i64 {
    match flip_probability(current, delta, pool_total) {
        Some(p) if rng.next_unit() < p => -delta,
        _ => delta,
    }
}

/// Dampens `delta` and commits it for `(target, channel)` in one atomic store step.
///
/// The pool is the target's server. When a `gate` is given it is checked against the record's
/// last update inside that same step, so two racing events can't both pass it. Bots and
/// gated-out changes yield `None`.
#[instrument(skip(store, target, channel, gate, rng), fields(user = %target.id, channel = %channel.id))]
pub async fn apply<R: RandomSource + Send>(
    store: &dyn ReputationStore,
    target: &User,
    channel: &Channel,
    delta: i64,
    at: DateTime<Utc>,
    gate: Option<&CooldownGate>,
    rng: &mut R,
) -> StoreResult<Option<Adjustment>> {
    if target.bot {
        tracing::trace!("suppressed adjustment for bot");
        return Ok(None);
    }

    let pool_total = store
        .sum_non_negative(&Scope::Guild(channel.server_id.clone()))
        .await?;

    let mut applied = delta;
    let mut closed_since = None;
    let change = store
        .adjust_score(&target.id, &channel.id, at, &mut |current, last| {
            if gate.is_some_and(|g| !g.is_open(last, at)) {
                closed_since = last;
                return None;
            }

            applied = dampen(current, delta, pool_total, rng);
            Some(applied)
        })
        .await?;

    let Some(change) = change else {
        tracing::debug!(last = ?closed_since, "cooldown gate closed");
        return Ok(None);
    };

    let adjustment = Adjustment {
        proposed: delta,
        applied,
        previous: change.previous,
        current: change.current,
    };

    tracing::info!(
        name = %target.name,
        applied = format_args!("{:+}", adjustment.applied),
        flipped = adjustment.flipped(),
        score = adjustment.current,
        "respec applied"
    );

    match adjustment.polarity() {
        Polarity::BecameNegative => tracing::info!(name = %target.name, "dropped below zero"),
        Polarity::Recovered => tracing::info!(name = %target.name, "recovered to non-negative"),
        Polarity::Unchanged => (),
    }

    Ok(Some(adjustment))
}
