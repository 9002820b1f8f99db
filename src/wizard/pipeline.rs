use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::api::{self, AccessApi, ApiError, EntityId, EntityKind, NewEntity};

use super::fields::{FieldValues, Selection};
use super::steps::StepKind;

/// Association attached to the parent after it exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Association {
    Roles,
    Members,
    ServiceAccounts,
}

impl Association {
    pub const ALL: [Association; 3] = [
        Association::Roles,
        Association::Members,
        Association::ServiceAccounts,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Association::Roles => "roles",
            Association::Members => "members",
            Association::ServiceAccounts => "service accounts",
        }
    }

    /// Step that collects this association's selection
    pub fn step(&self) -> StepKind {
        match self {
            Association::Roles => StepKind::Roles,
            Association::Members => StepKind::Members,
            Association::ServiceAccounts => StepKind::ServiceAccounts,
        }
    }

    fn selection<'a>(&self, values: &'a FieldValues) -> &'a Selection {
        match self {
            Association::Roles => &values.roles,
            Association::Members => &values.members,
            Association::ServiceAccounts => &values.service_accounts,
        }
    }
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    CreateParent,
    Attach(Association),
}

impl StageKind {
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::CreateParent => "create-parent",
            StageKind::Attach(Association::Roles) => "assign-roles",
            StageKind::Attach(Association::Members) => "assign-members",
            StageKind::Attach(Association::ServiceAccounts) => "assign-service-accounts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagePayload {
    Create(NewEntity),
    Assign(Vec<String>),
}

/// One dependent remote write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionStage {
    pub kind: StageKind,
    pub depends_on: Option<StageKind>,
    pub status: StageStatus,
    pub payload: StagePayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CreatingParent,
    AttachingAssociations,
    Succeeded,
    PartialFailure,
    TotalFailure,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Succeeded | Phase::PartialFailure | Phase::TotalFailure
        )
    }
}

/// Aggregate state of a submission, emitted on every change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineResult {
    pub phase: Phase,
    pub parent_id: Option<EntityId>,
    pub stages: Vec<SubmissionStage>,
}

impl PipelineResult {
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn stage(&self, kind: StageKind) -> Option<&SubmissionStage> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    pub fn failed_associations(&self) -> Vec<Association> {
        self.stages
            .iter()
            .filter_map(|s| match (s.kind, &s.status) {
                (StageKind::Attach(association), StageStatus::Failed(_)) => Some(association),
                _ => None,
            })
            .collect()
    }

    /// (current, total) for a "1 of 2" indicator
    pub fn progress(&self) -> (usize, usize) {
        let total = if self.stages.len() > 1 { 2 } else { 1 };
        match self.phase {
            Phase::CreatingParent => (1, total),
            Phase::AttachingAssociations => (2, total),
            Phase::Succeeded | Phase::PartialFailure | Phase::TotalFailure => (total, total),
        }
    }

    /// User-facing summary once terminal
    pub fn message(&self) -> Option<String> {
        let parent = self.stages.first()?;
        let StagePayload::Create(entity) = &parent.payload else {
            return None;
        };
        match self.phase {
            Phase::CreatingParent | Phase::AttachingAssociations => None,
            Phase::Succeeded => Some(format!("{} '{}' created", capitalize(entity.kind), entity.name)),
            Phase::PartialFailure => {
                let failed: Vec<&str> = self
                    .failed_associations()
                    .iter()
                    .map(Association::label)
                    .collect();
                Some(format!(
                    "{} '{}' was created, but some associations could not be attached: {}",
                    capitalize(entity.kind),
                    entity.name,
                    failed.join(", ")
                ))
            }
            Phase::TotalFailure => {
                let reason = match &parent.status {
                    StageStatus::Failed(reason) => reason.as_str(),
                    _ => "unknown error",
                };
                Some(format!(
                    "Could not create {} '{}': {}",
                    entity.kind, entity.name, reason
                ))
            }
        }
    }
}

fn capitalize(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Group => "Group",
        EntityKind::Role => "Role",
    }
}

/// Frozen input for one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub kind: EntityKind,
    pub values: FieldValues,
    /// Steps that existed in the session's graph
    pub steps: Vec<StepKind>,
}

impl Submission {
    fn new_entity(&self) -> NewEntity {
        let permissions = if self.kind == EntityKind::Role && self.steps.contains(&StepKind::Permissions) {
            self.values.permissions.ids()
        } else {
            Vec::new()
        };
        NewEntity {
            kind: self.kind,
            name: self.values.name.clone(),
            description: self.values.description.clone(),
            permissions,
        }
    }
}

/// Creates the parent entity, then attaches every non-empty association concurrently
pub struct SubmissionPipeline {
    api: Arc<dyn AccessApi>,
    stage_timeout: Duration,
}

impl SubmissionPipeline {
    pub fn new(api: Arc<dyn AccessApi>, stage_timeout: Duration) -> Self {
        Self { api, stage_timeout }
    }

    /// Stages a submission will run, all `NotStarted`
    pub fn plan(submission: &Submission) -> Vec<SubmissionStage> {
        let mut stages = vec![SubmissionStage {
            kind: StageKind::CreateParent,
            depends_on: None,
            status: StageStatus::NotStarted,
            payload: StagePayload::Create(submission.new_entity()),
        }];

        for association in Association::ALL {
            let selection = association.selection(&submission.values);
            if selection.is_empty() || !submission.steps.contains(&association.step()) {
                continue;
            }
            stages.push(SubmissionStage {
                kind: StageKind::Attach(association),
                depends_on: Some(StageKind::CreateParent),
                status: StageStatus::NotStarted,
                payload: StagePayload::Assign(selection.ids()),
            });
        }

        stages
    }

    /// Run the submission to a terminal state, sending every intermediate result.
    /// Never fails: stage errors are captured in the returned result.
    pub async fn run<M>(&self, submission: Submission, updates: &mpsc::UnboundedSender<M>) -> PipelineResult
    where
        M: From<PipelineResult>,
    {
        let entity = submission.new_entity();
        let mut result = PipelineResult {
            phase: Phase::CreatingParent,
            parent_id: None,
            stages: Self::plan(&submission),
        };

        info!("Creating {} '{}'", entity.kind, entity.name);
        result.stages[0].status = StageStatus::Running;
        emit(updates, &result);

        let parent = match self.bounded(self.api.create_entity(&entity)).await {
            Ok(id) => id,
            Err(e) => {
                warn!("create-parent failed: {e}");
                result.stages[0].status = StageStatus::Failed(e.to_string());
                result.phase = Phase::TotalFailure;
                emit(updates, &result);
                return result;
            }
        };

        info!("Created {} {}", entity.kind, parent);
        result.stages[0].status = StageStatus::Succeeded;
        result.parent_id = Some(parent.clone());

        if result.stages.len() == 1 {
            result.phase = Phase::Succeeded;
            emit(updates, &result);
            return result;
        }

        result.phase = Phase::AttachingAssociations;
        let mut in_flight = FuturesUnordered::new();
        for (idx, stage) in result.stages.iter_mut().enumerate().skip(1) {
            let (StageKind::Attach(association), StagePayload::Assign(ids)) = (stage.kind, &stage.payload)
            else {
                continue;
            };
            stage.status = StageStatus::Running;
            let ids = ids.clone();
            let parent = &parent;
            in_flight.push(async move {
                info!("Attaching {} {} to {}", ids.len(), association, parent);
                (idx, self.attach(association, parent, &ids).await)
            });
        }
        emit(updates, &result);

        // Wait for every stage; one failure does not cut the others short
        while let Some((idx, outcome)) = in_flight.next().await {
            let stage = &mut result.stages[idx];
            stage.status = match outcome {
                Ok(()) => StageStatus::Succeeded,
                Err(e) => {
                    warn!("{} failed: {e}", stage.kind.label());
                    StageStatus::Failed(e.to_string())
                }
            };
            emit(updates, &result);
        }

        result.phase = if result.failed_associations().is_empty() {
            Phase::Succeeded
        } else {
            Phase::PartialFailure
        };
        emit(updates, &result);
        result
    }

    async fn attach(&self, association: Association, parent: &EntityId, ids: &[String]) -> api::Result<()> {
        match association {
            Association::Roles => self.bounded(self.api.assign_roles(parent, ids)).await,
            Association::Members => self.bounded(self.api.assign_members(parent, ids)).await,
            Association::ServiceAccounts => {
                self.bounded(self.api.assign_service_accounts(parent, ids)).await
            }
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = api::Result<T>>) -> api::Result<T> {
        tokio::time::timeout(self.stage_timeout, call)
            .await
            .unwrap_or_else(|_| Err(ApiError::Timeout(self.stage_timeout.as_millis() as u64)))
    }
}

fn emit<M: From<PipelineResult>>(updates: &mpsc::UnboundedSender<M>, result: &PipelineResult) {
    let _ = updates.send(M::from(result.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, DryrunApi, Operation};

    const LATENCY: Duration = Duration::from_millis(100);

    fn submission(roles: &[&str], members: &[&str], accounts: &[&str]) -> Submission {
        let selection = |ids: &[&str]| ids.iter().map(|id| (*id, *id)).collect::<Selection>();
        Submission {
            kind: EntityKind::Group,
            values: FieldValues {
                name: "Engineering".to_string(),
                description: None,
                roles: selection(roles),
                members: selection(members),
                service_accounts: selection(accounts),
                permissions: Selection::new(),
            },
            steps: vec![
                StepKind::Name,
                StepKind::Roles,
                StepKind::Members,
                StepKind::ServiceAccounts,
                StepKind::Review,
            ],
        }
    }

    async fn run(api: Arc<DryrunApi>, submission: Submission) -> (PipelineResult, Vec<PipelineResult>) {
        let pipeline = SubmissionPipeline::new(api, Duration::from_secs(10));
        let (tx, mut rx) = mpsc::unbounded_channel::<PipelineResult>();
        let result = pipeline.run(submission, &tx).await;
        drop(tx);
        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        (result, updates)
    }

    #[tokio::test(start_paused = true)]
    async fn associations_wait_for_parent_and_skip_empty_selections() {
        let api = Arc::new(DryrunApi::new().with_latency(Operation::CreateEntity, LATENCY));
        let (result, _) = run(api.clone(), submission(&["role-1"], &["alice"], &[])).await;

        assert_eq!(result.phase, Phase::Succeeded);
        let calls = api.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].call.operation(), Operation::CreateEntity);
        let created_at = calls[0].issued_at + LATENCY;
        for call in &calls[1..] {
            assert!(call.issued_at >= created_at);
        }
        assert_eq!(api.count(Operation::AssignRoles), 1);
        assert_eq!(api.count(Operation::AssignMembers), 1);
        assert_eq!(api.count(Operation::AssignServiceAccounts), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn optional_stages_run_concurrently() {
        let api = Arc::new(
            DryrunApi::new()
                .with_latency(Operation::AssignRoles, LATENCY)
                .with_latency(Operation::AssignMembers, LATENCY)
                .with_latency(Operation::AssignServiceAccounts, LATENCY),
        );
        let (result, _) = run(api.clone(), submission(&["role-1"], &["alice"], &["sa-1"])).await;

        assert_eq!(result.phase, Phase::Succeeded);
        let calls = api.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[1..].iter().all(|c| c.issued_at == calls[1].issued_at));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_failure_is_total_and_attaches_nothing() {
        let api = Arc::new(DryrunApi::new().fail_on(Operation::CreateEntity));
        let (result, updates) = run(api.clone(), submission(&["role-1"], &["alice"], &[])).await;

        assert_eq!(result.phase, Phase::TotalFailure);
        assert_eq!(result.parent_id, None);
        assert_eq!(api.calls().len(), 1);
        assert!(matches!(result.stages[0].status, StageStatus::Failed(_)));
        assert!(result.stages[1..].iter().all(|s| s.status == StageStatus::NotStarted));
        assert_eq!(updates.last(), Some(&result));
        assert!(result.message().unwrap().starts_with("Could not create group"));
    }

    #[tokio::test(start_paused = true)]
    async fn member_failure_is_partial_success_naming_members() {
        let api = Arc::new(DryrunApi::new().fail_on(Operation::AssignMembers));
        let (result, _) = run(api.clone(), submission(&["role-1"], &["alice"], &[])).await;

        assert_eq!(result.phase, Phase::PartialFailure);
        assert!(result.parent_id.is_some());
        assert_eq!(result.failed_associations(), vec![Association::Members]);
        assert_eq!(
            result.stage(StageKind::Attach(Association::Roles)).map(|s| &s.status),
            Some(&StageStatus::Succeeded)
        );
        assert_eq!(
            result.message().unwrap(),
            "Group 'Engineering' was created, but some associations could not be attached: members"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stage_timeout_counts_as_failure() {
        let api = Arc::new(DryrunApi::new().with_latency(Operation::AssignRoles, Duration::from_secs(60)));
        let (result, _) = run(api, submission(&["role-1"], &[], &[])).await;

        assert_eq!(result.phase, Phase::PartialFailure);
        let status = &result.stage(StageKind::Attach(Association::Roles)).unwrap().status;
        assert!(matches!(status, StageStatus::Failed(msg) if msg.contains("Timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_reports_two_phases_before_terminal() {
        let api = Arc::new(DryrunApi::new());
        let (_, updates) = run(api, submission(&[], &["alice"], &[])).await;

        let progress: Vec<(Phase, (usize, usize))> =
            updates.iter().map(|u| (u.phase, u.progress())).collect();
        assert_eq!(progress.first(), Some(&(Phase::CreatingParent, (1, 2))));
        assert!(progress.contains(&(Phase::AttachingAssociations, (2, 2))));
        assert_eq!(progress.last(), Some(&(Phase::Succeeded, (2, 2))));
    }

    #[tokio::test(start_paused = true)]
    async fn selections_for_missing_steps_are_not_submitted() {
        let api = Arc::new(DryrunApi::new());
        let mut submission = submission(&["role-1"], &["alice"], &["sa-1"]);
        submission.steps = vec![StepKind::Name, StepKind::Members, StepKind::Review];

        let (result, _) = run(api.clone(), submission).await;
        assert_eq!(result.stages.len(), 2);
        assert_eq!(api.count(Operation::AssignRoles), 0);
        assert_eq!(api.count(Operation::AssignServiceAccounts), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn role_submission_carries_permissions_in_one_call() {
        let api = Arc::new(DryrunApi::new());
        let submission = Submission {
            kind: EntityKind::Role,
            values: FieldValues {
                name: "Auditor".to_string(),
                permissions: [("inventory:hosts:read", "Read hosts")].into_iter().collect(),
                ..FieldValues::default()
            },
            steps: vec![StepKind::Name, StepKind::Permissions, StepKind::Review],
        };

        let (result, updates) = run(api.clone(), submission).await;
        assert_eq!(result.phase, Phase::Succeeded);
        assert_eq!(result.progress(), (1, 1));
        assert!(updates.iter().all(|u| u.phase != Phase::AttachingAssociations));
        match &api.calls()[0].call {
            ApiCall::CreateEntity(entity) => {
                assert_eq!(entity.permissions, vec!["inventory:hosts:read".to_string()]);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }
}
