//! Tier classification over a server's ranked standings.
//!
//! Three tiers are computed independently: the single top user, the "ruling class" (the users
//! at the head of the ranking who together hold half the non-negative pool), and the losers
//! (everyone below zero). A loser never keeps either of the other two roles.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::db::models::reputation::Standing;
use crate::db::models::user::UserId;
use crate::rank::by_rank;
use crate::rate::adjust::cap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Top,
    Ruling,
    Loser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleAction {
    Grant,
    Revoke,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleOp {
    pub user: UserId,
    pub tier: Tier,
    pub action: RoleAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub top: Option<UserId>,
    pub ruling: BTreeSet<UserId>,
    pub losers: BTreeSet<UserId>,
    /// Sum of the non-negative totals.
    pub pool_total: i64,
    /// Users in rank order; this is who the plan is issued for.
    pub ranked: Vec<UserId>,
}

pub fn classify(snapshot: &[Standing]) -> Classification {
    let mut ranked: Vec<&Standing> = snapshot.iter().collect();
    ranked.sort_by(|a, b| by_rank(a, b));

    let pool_total: i64 = ranked.iter().map(|s| s.score).filter(|s| *s >= 0).sum();
    let half = pool_total / 2;

    let mut ruling = BTreeSet::new();
    let mut running = 0;
    for standing in &ranked {
        if running < half {
            ruling.insert(standing.user_id.clone());
        }
        running += standing.score;
    }

    Classification {
        top: ranked.first().map(|s| s.user_id.clone()),
        ruling,
        losers: ranked
            .iter()
            .filter(|s| s.score < 0)
            .map(|s| s.user_id.clone())
            .collect(),
        pool_total,
        ranked: ranked.iter().map(|s| s.user_id.clone()).collect(),
    }
}

impl Classification {
    /// Dampening cap for this pool.
    pub fn cap(&self) -> i64 {
        cap(self.pool_total)
    }

    /// Tiers `user` should end up holding once loser precedence is applied.
    pub fn tiers_of(&self, user: &UserId) -> BTreeSet<Tier> {
        if self.losers.contains(user) {
            return BTreeSet::from([Tier::Loser]);
        }

        let mut tiers = BTreeSet::new();
        if self.ruling.contains(user) {
            tiers.insert(Tier::Ruling);
        }
        if self.top.as_ref() == Some(user) {
            tiers.insert(Tier::Top);
        }

        tiers
    }

    /// One grant or revoke per user per tier, issued unconditionally. Order is rank order, then
    /// Loser, Ruling, Top for each user.
    pub fn plan(&self) -> Vec<RoleOp> {
        let mut ops = Vec::with_capacity(self.ranked.len() * 3);

        for user in &self.ranked {
            let held = self.tiers_of(user);
            for tier in [Tier::Loser, Tier::Ruling, Tier::Top] {
                ops.push(RoleOp {
                    user: user.clone(),
                    tier,
                    action: if held.contains(&tier) {
                        RoleAction::Grant
                    } else {
                        RoleAction::Revoke
                    },
                });
            }
        }

        ops
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scenario() -> Vec<Standing> {
        vec![
            Standing::new("D", "dave", -20),
            Standing::new("B", "bob", 80),
            Standing::new("A", "alice", 100),
            Standing::new("C", "carol", 5),
        ]
    }

    fn ids(names: &[&str]) -> BTreeSet<UserId> {
        names.iter().map(|n| UserId::from(*n)).collect()
    }

    #[test]
    fn test_worked_example() {
        let c = classify(&scenario());

        assert_eq!(c.pool_total, 185);
        assert_eq!(c.cap(), 123);
        assert_eq!(c.top, Some(UserId::from("A")));
        assert_eq!(c.ruling, ids(&["A"]));
        assert_eq!(c.losers, ids(&["D"]));
    }

    #[test]
    fn test_ruling_accumulates_until_half() {
        let c = classify(&[
            Standing::new("A", "a", 30),
            Standing::new("B", "b", 30),
            Standing::new("C", "c", 30),
            Standing::new("D", "d", 10),
        ]);

        // half = 50: A (0<50), B (30<50), C excluded (60)
        assert_eq!(c.ruling, ids(&["A", "B"]));
    }

    #[test]
    fn test_all_negative_pool() {
        let c = classify(&[Standing::new("A", "a", -3), Standing::new("B", "b", -9)]);

        // half the pool is 0: A doesn't make it, but the running total drops to -3 before B
        assert_eq!(c.ruling, ids(&["B"]));
        assert_eq!(c.top, Some(UserId::from("A")));
        assert_eq!(c.losers, ids(&["A", "B"]));

        // losers hold nothing else, whether leading or ruling
        assert_eq!(c.tiers_of(&UserId::from("A")), BTreeSet::from([Tier::Loser]));
        assert_eq!(c.tiers_of(&UserId::from("B")), BTreeSet::from([Tier::Loser]));
    }

    #[test]
    fn test_plan_covers_every_user_and_tier() {
        let c = classify(&scenario());
        let plan = c.plan();

        assert_eq!(plan.len(), 12);

        let grants: Vec<(&str, Tier)> = plan
            .iter()
            .filter(|op| op.action == RoleAction::Grant)
            .map(|op| (op.user.0.as_str(), op.tier))
            .collect();
        assert_eq!(
            grants,
            vec![("A", Tier::Ruling), ("A", Tier::Top), ("D", Tier::Loser)]
        );
    }

    #[test]
    fn test_plan_is_stable() {
        let first = classify(&scenario()).plan();
        let mut shuffled = scenario();
        shuffled.reverse();
        let second = classify(&shuffled).plan();

        assert_eq!(first, second);
    }
}
