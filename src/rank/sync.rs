use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::instrument;

use crate::constants::{LOSER_ROLE_NAME, ROLE_CALL_TIMEOUT_SECS, RULING_ROLE_NAME, TOP_ROLE_NAME};
use crate::db::models::channel::ServerId;
use crate::db::models::reputation::Scope;
use crate::db::{ReputationStore, StoreResult};
use crate::rank::tier::{RoleAction, Tier, classify};
use crate::roles::{RoleErr, RoleGateway, RoleId, RoleResult};

/// Platform role name for each tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleNames {
    pub top: String,
    pub ruling: String,
    pub loser: String,
}

impl Default for RoleNames {
    fn default() -> Self {
        Self {
            top: TOP_ROLE_NAME.to_owned(),
            ruling: RULING_ROLE_NAME.to_owned(),
            loser: LOSER_ROLE_NAME.to_owned(),
        }
    }
}

impl RoleNames {
    pub fn name(&self, tier: Tier) -> &str {
        match tier {
            Tier::Top => &self.top,
            Tier::Ruling => &self.ruling,
            Tier::Loser => &self.loser,
        }
    }
}

/// Counts for one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub users: usize,
    pub issued: usize,
    /// Ops dropped because their role doesn't exist on the server.
    pub skipped: usize,
    pub failed: usize,
}

/// Mirrors a server's tier classification onto platform roles.
///
/// Every pass issues a grant or revoke for every user and tier, whether or not the platform
/// already agrees. Role failures are logged and counted, never returned.
#[derive(Debug, Clone)]
pub struct TierSynchronizer {
    store: Arc<dyn ReputationStore>,
    roles: Arc<dyn RoleGateway>,
    names: RoleNames,
    call_timeout: Duration,
}

impl TierSynchronizer {
    pub fn new(
        store: Arc<dyn ReputationStore>,
        roles: Arc<dyn RoleGateway>,
        names: RoleNames,
    ) -> Self {
        Self {
            store,
            roles,
            names,
            call_timeout: Duration::from_secs(ROLE_CALL_TIMEOUT_SECS),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    #[instrument(skip(self))]
    pub async fn sync(&self, server: &ServerId) -> StoreResult<SyncReport> {
        let snapshot = self.store.list_ranked(&Scope::Guild(server.clone())).await?;
        let classification = classify(&snapshot);

        let mut role_ids = HashMap::with_capacity(3);
        for tier in [Tier::Top, Tier::Ruling, Tier::Loser] {
            let name = self.names.name(tier);
            let id = match self.bounded(self.roles.resolve_role_id(server, name)).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(role = name, error = %e, "unable to resolve role");
                    RoleId::empty()
                }
            };

            if id.is_empty() {
                tracing::debug!(role = name, "role not present on server");
            }
            role_ids.insert(tier, id);
        }

        let mut report = SyncReport {
            users: classification.ranked.len(),
            ..Default::default()
        };

        for op in classification.plan() {
            let Some(role) = role_ids.get(&op.tier).filter(|id| !id.is_empty()) else {
                report.skipped += 1;
                continue;
            };

            let result = match op.action {
                RoleAction::Grant => {
                    self.bounded(self.roles.grant_role(server, &op.user, role))
                        .await
                }
                RoleAction::Revoke => {
                    self.bounded(self.roles.revoke_role(server, &op.user, role))
                        .await
                }
            };

            match result {
                Ok(()) => report.issued += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        user = %op.user,
                        tier = ?op.tier,
                        action = ?op.action,
                        error = %e,
                        "role call failed"
                    );
                }
            }
        }

        tracing::debug!(
            top = ?classification.top,
            ruling = classification.ruling.len(),
            losers = classification.losers.len(),
            ?report,
            "tiers synchronized"
        );

        Ok(report)
    }

    async fn bounded<T>(&self, call: impl Future<Output = RoleResult<T>>) -> RoleResult<T> {
        timeout(self.call_timeout, call)
            .await
            .map_err(|_| RoleErr::Timeout(self.call_timeout))?
    }
}
