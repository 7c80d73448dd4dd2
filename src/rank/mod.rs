use std::cmp::Ordering;

use tracing::instrument;

use crate::constants::LEADERBOARD_PADDING;
use crate::db::models::reputation::{Scope, Standing};
use crate::db::{ReputationStore, StoreResult};

pub mod sync;
pub mod tier;

/// Leaderboard and loser list for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Standings {
    /// Up to `size` non-negative entries, highest first.
    pub leaderboard: Vec<Standing>,
    /// Every negative entry, alphabetical by name.
    pub losers: Vec<Standing>,
}

/// Score descending, ties broken by user id so output is reproducible.
pub fn by_rank(a: &Standing, b: &Standing) -> Ordering {
    b.score.cmp(&a.score).then_with(|| a.user_id.cmp(&b.user_id))
}

/// Pure ranking over a snapshot of per-user totals.
pub fn standings(mut snapshot: Vec<Standing>, size: usize) -> Standings {
    snapshot.sort_by(by_rank);

    let (mut leaderboard, mut losers): (Vec<_>, Vec<_>) =
        snapshot.into_iter().partition(|s| s.score >= 0);

    leaderboard.truncate(size);
    losers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.user_id.cmp(&b.user_id)));

    Standings {
        leaderboard,
        losers,
    }
}

#[instrument(skip(store))]
pub async fn rank(store: &dyn ReputationStore, scope: &Scope, size: usize) -> StoreResult<Standings> {
    let snapshot = store.list_ranked(scope).await?;
    tracing::debug!(entries = snapshot.len(), "ranking snapshot loaded");

    Ok(standings(snapshot, size))
}

impl Standings {
    /// Two aligned columns, name then score, one entry per line.
    pub fn leaderboard_text(&self) -> String {
        let width = self
            .leaderboard
            .iter()
            .map(|s| s.name.chars().count())
            .max()
            .unwrap_or_default()
            + LEADERBOARD_PADDING;

        self.leaderboard
            .iter()
            .map(|s| format!("{:<width$}{}\n", s.name, s.score))
            .collect()
    }

    pub fn loser_names(&self) -> Vec<&str> {
        self.losers.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn render(&self) -> String {
        format!(
            "Leaderboard:\n```\n{}```\nLosers:` {} `",
            self.leaderboard_text(),
            self.loser_names().join(", ")
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn snapshot() -> Vec<Standing> {
        vec![
            Standing::new("u:4", "dave", -20),
            Standing::new("u:2", "bob", 80),
            Standing::new("u:3", "carol", 5),
            Standing::new("u:1", "alice", 100),
            Standing::new("u:5", "aaron", -1),
            Standing::new("u:6", "erin", 5),
        ]
    }

    #[test]
    fn test_leaderboard_sorted_and_non_negative() {
        let result = standings(snapshot(), 15);

        let scores: Vec<i64> = result.leaderboard.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![100, 80, 5, 5]);
        assert!(result.leaderboard.windows(2).all(|w| w[0].score >= w[1].score));

        // tie at 5 resolved by user id
        assert_eq!(result.leaderboard[2].name, "carol");
        assert_eq!(result.leaderboard[3].name, "erin");
    }

    #[test]
    fn test_losers_are_every_negative_alphabetically() {
        let result = standings(snapshot(), 2);

        assert_eq!(result.leaderboard.len(), 2);
        assert_eq!(result.loser_names(), vec!["aaron", "dave"]);
    }

    #[test]
    fn test_leaderboard_limit() {
        let many: Vec<Standing> = (0..40)
            .map(|i| Standing::new(format!("u:{i:02}"), &format!("user{i}"), i - 10))
            .collect();

        let result = standings(many, 15);
        assert_eq!(result.leaderboard.len(), 15);
        assert_eq!(result.leaderboard[0].score, 29);
        assert_eq!(result.losers.len(), 10);
    }

    #[test]
    fn test_text_alignment() {
        let result = standings(
            vec![
                Standing::new("u:1", "alice", 100),
                Standing::new("u:2", "bo", 7),
            ],
            15,
        );

        assert_eq!(result.leaderboard_text(), "alice   100\nbo      7\n");
        assert_eq!(
            result.render(),
            "Leaderboard:\n```\nalice   100\nbo      7\n```\nLosers:`  `"
        );
    }

    #[test]
    fn test_empty_snapshot() {
        let result = standings(Vec::new(), 15);
        assert!(result.leaderboard.is_empty());
        assert_eq!(result.leaderboard_text(), "");
    }
}
