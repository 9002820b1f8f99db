mod dryrun;
mod error;
mod http;

pub use dryrun::{ApiCall, DryrunApi, RecordedCall};
pub use error::{ApiError, Result};
pub use http::HttpApi;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConsoleConfig;

/// Kind of parent entity the wizard creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Group,
    Role,
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Group => "group",
            EntityKind::Role => "role",
        }
    }

    /// Collection segment used by the REST API
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Group => "groups",
            EntityKind::Role => "roles",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identifier of a created parent entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row returned by a name lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySummary {
    pub id: EntityId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    Partial,
}

impl MatchMode {
    pub fn as_query(&self) -> &'static str {
        match self {
            MatchMode::Exact => "exact",
            MatchMode::Partial => "partial",
        }
    }
}

/// Payload for creating the parent entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub name: String,
    pub description: Option<String>,
    /// Access list; only meaningful for roles
    pub permissions: Vec<String>,
}

/// Remote operations, used to address failures and latency in the dry-run backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Lookup,
    CreateEntity,
    AssignRoles,
    AssignMembers,
    AssignServiceAccounts,
}

/// Remote access-control API the wizard depends on
#[async_trait]
pub trait AccessApi: Send + Sync {
    async fn lookup_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        mode: MatchMode,
    ) -> Result<Vec<EntitySummary>>;

    async fn create_entity(&self, entity: &NewEntity) -> Result<EntityId>;

    async fn assign_roles(&self, group: &EntityId, roles: &[String]) -> Result<()>;

    async fn assign_members(&self, group: &EntityId, principals: &[String]) -> Result<()>;

    async fn assign_service_accounts(&self, group: &EntityId, client_ids: &[String]) -> Result<()>;
}

/// Create the appropriate backend based on dryrun mode
pub fn create_api(config: &ConsoleConfig) -> Result<Arc<dyn AccessApi>> {
    if config.general.dryrun {
        Ok(Arc::new(DryrunApi::new()))
    } else {
        Ok(Arc::new(HttpApi::from_config(&config.api)?))
    }
}
