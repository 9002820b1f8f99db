use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::error::{ApiError, Result};
use super::{AccessApi, EntityId, EntityKind, EntitySummary, MatchMode, NewEntity, Operation};

/// A call received by the dry-run backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Lookup { kind: EntityKind, name: String },
    CreateEntity(NewEntity),
    AssignRoles { group: EntityId, ids: Vec<String> },
    AssignMembers { group: EntityId, ids: Vec<String> },
    AssignServiceAccounts { group: EntityId, ids: Vec<String> },
}

impl ApiCall {
    pub fn operation(&self) -> Operation {
        match self {
            ApiCall::Lookup { .. } => Operation::Lookup,
            ApiCall::CreateEntity(_) => Operation::CreateEntity,
            ApiCall::AssignRoles { .. } => Operation::AssignRoles,
            ApiCall::AssignMembers { .. } => Operation::AssignMembers,
            ApiCall::AssignServiceAccounts { .. } => Operation::AssignServiceAccounts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub call: ApiCall,
    pub issued_at: Instant,
}

#[derive(Default)]
struct DryrunState {
    entities: Vec<(EntityKind, EntitySummary)>,
    failing: HashSet<Operation>,
    latency: HashMap<Operation, Duration>,
    lookup_delays: HashMap<String, Duration>,
    calls: Vec<RecordedCall>,
}

/// In-memory backend that simulates the remote API without network access.
///
/// Also serves as the test double: failures and latency can be injected per
/// operation and every call is recorded with the instant it was issued.
#[derive(Default)]
pub struct DryrunApi {
    state: Mutex<DryrunState>,
}

impl DryrunApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity so lookups for its name report a conflict
    pub fn with_existing(self, kind: EntityKind, name: &str) -> Self {
        self.lock().entities.push((
            kind,
            EntitySummary {
                id: EntityId(uuid::Uuid::new_v4().to_string()),
                name: name.to_string(),
            },
        ));
        self
    }

    pub fn fail_on(self, op: Operation) -> Self {
        self.lock().failing.insert(op);
        self
    }

    pub fn with_latency(self, op: Operation, delay: Duration) -> Self {
        self.lock().latency.insert(op, delay);
        self
    }

    /// Delay lookups for one specific candidate name (overrides the lookup latency)
    pub fn with_lookup_delay(self, name: &str, delay: Duration) -> Self {
        self.lock().lookup_delays.insert(name.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.call.operation() == op)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, DryrunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, then wait out the configured latency and apply injected failures
    async fn begin(&self, call: ApiCall) -> Result<()> {
        let op = call.operation();
        let (delay, fails) = {
            let mut state = self.lock();
            let delay = match &call {
                ApiCall::Lookup { name, .. } => state.lookup_delays.get(name).copied(),
                _ => None,
            }
            .or_else(|| state.latency.get(&op).copied());
            let fails = state.failing.contains(&op);
            debug!("dryrun call: {:?}", call);
            state.calls.push(RecordedCall {
                call,
                issued_at: Instant::now(),
            });
            (delay, fails)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fails {
            return Err(ApiError::Rejected(format!("simulated {op:?} failure")));
        }
        Ok(())
    }

    fn group_exists(&self, group: &EntityId) -> Result<()> {
        let found = self
            .lock()
            .entities
            .iter()
            .any(|(kind, e)| *kind == EntityKind::Group && e.id == *group);
        if found {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: 404,
                body: format!("group {group} not found"),
            })
        }
    }
}

#[async_trait]
impl AccessApi for DryrunApi {
    async fn lookup_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        mode: MatchMode,
    ) -> Result<Vec<EntitySummary>> {
        self.begin(ApiCall::Lookup {
            kind,
            name: name.to_string(),
        })
        .await?;

        let needle = fold(name);
        let matches = self
            .lock()
            .entities
            .iter()
            .filter(|(k, _)| *k == kind)
            .filter(|(_, e)| match mode {
                MatchMode::Exact => fold(&e.name) == needle,
                MatchMode::Partial => fold(&e.name).contains(&needle),
            })
            .map(|(_, e)| e.clone())
            .collect();
        Ok(matches)
    }

    async fn create_entity(&self, entity: &NewEntity) -> Result<EntityId> {
        self.begin(ApiCall::CreateEntity(entity.clone())).await?;

        let mut state = self.lock();
        let taken = state
            .entities
            .iter()
            .any(|(k, e)| *k == entity.kind && fold(&e.name) == fold(&entity.name));
        if taken {
            return Err(ApiError::Status {
                status: 400,
                body: format!("{} with name '{}' already exists", entity.kind, entity.name),
            });
        }

        let id = EntityId(uuid::Uuid::new_v4().to_string());
        state.entities.push((
            entity.kind,
            EntitySummary {
                id: id.clone(),
                name: entity.name.clone(),
            },
        ));
        Ok(id)
    }

    async fn assign_roles(&self, group: &EntityId, roles: &[String]) -> Result<()> {
        self.begin(ApiCall::AssignRoles {
            group: group.clone(),
            ids: roles.to_vec(),
        })
        .await?;
        self.group_exists(group)
    }

    async fn assign_members(&self, group: &EntityId, principals: &[String]) -> Result<()> {
        self.begin(ApiCall::AssignMembers {
            group: group.clone(),
            ids: principals.to_vec(),
        })
        .await?;
        self.group_exists(group)
    }

    async fn assign_service_accounts(&self, group: &EntityId, client_ids: &[String]) -> Result<()> {
        self.begin(ApiCall::AssignServiceAccounts {
            group: group.clone(),
            ids: client_ids.to_vec(),
        })
        .await?;
        self.group_exists(group)
    }
}

/// Names compare case-insensitively, Unicode aware
fn fold(name: &str) -> String {
    name.to_lowercase()
}
