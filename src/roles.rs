//! Contract with whatever owns the platform's group roles.

use core::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::channel::ServerId;
use crate::db::models::user::UserId;

/// Platform role identifier. Empty when the role name could not be resolved on a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for RoleId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grants and revokes must treat an empty [`RoleId`] as a no-op.
#[async_trait]
pub trait RoleGateway: Send + Sync + fmt::Debug {
    async fn resolve_role_id(&self, server: &ServerId, name: &str) -> RoleResult<RoleId>;
    async fn grant_role(&self, server: &ServerId, user: &UserId, role: &RoleId) -> RoleResult<()>;
    async fn revoke_role(&self, server: &ServerId, user: &UserId, role: &RoleId)
    -> RoleResult<()>;
}

/// Resolves every role name to its own name and only logs grants/revokes. Used when no platform is
/// attached, e.g. when replaying recorded events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRoleGateway;

#[async_trait]
impl RoleGateway for TracingRoleGateway {
    async fn resolve_role_id(&self, _server: &ServerId, name: &str) -> RoleResult<RoleId> {
        Ok(RoleId::from(name))
    }

    async fn grant_role(&self, server: &ServerId, user: &UserId, role: &RoleId) -> RoleResult<()> {
        if !role.is_empty() {
            tracing::info!(%server, %user, %role, "grant role");
        }
        Ok(())
    }

    async fn revoke_role(
        &self,
        server: &ServerId,
        user: &UserId,
        role: &RoleId,
    ) -> RoleResult<()> {
        if !role.is_empty() {
            tracing::debug!(%server, %user, %role, "revoke role");
        }
        Ok(())
    }
}

pub type RoleResult<T> = core::result::Result<T, RoleErr>;

#[derive(Debug, Error)]
pub enum RoleErr {
    #[error("role call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("platform rejected role call: {0}")]
    Rejected(String),
}
