use crate::api::EntityKind;
use crate::config::FeatureToggles;

use super::fields::Field;

/// Unique identifier for each wizard step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    Name,
    Roles,
    Members,
    ServiceAccounts,
    Permissions,
    Review,
}

/// Candidate order; inclusion is decided per session
const ORDER: [StepKind; 6] = [
    StepKind::Name,
    StepKind::Roles,
    StepKind::Members,
    StepKind::ServiceAccounts,
    StepKind::Permissions,
    StepKind::Review,
];

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Name => "name",
            StepKind::Roles => "roles",
            StepKind::Members => "members",
            StepKind::ServiceAccounts => "service-accounts",
            StepKind::Permissions => "permissions",
            StepKind::Review => "review",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            StepKind::Name => "Name and description",
            StepKind::Roles => "Add roles",
            StepKind::Members => "Add members",
            StepKind::ServiceAccounts => "Add service accounts",
            StepKind::Permissions => "Add permissions",
            StepKind::Review => "Review details",
        }
    }

    /// Whether this step belongs to the graph for the given entity and toggles
    pub fn is_included(&self, kind: EntityKind, toggles: &FeatureToggles) -> bool {
        match (kind, self) {
            (_, StepKind::Name) | (_, StepKind::Review) => true,
            // The simplified access model assigns roles elsewhere
            (EntityKind::Group, StepKind::Roles) => !toggles.workspaces,
            (EntityKind::Group, StepKind::Members) => true,
            (EntityKind::Group, StepKind::ServiceAccounts) => toggles.service_accounts,
            (EntityKind::Group, StepKind::Permissions) => false,
            (EntityKind::Role, StepKind::Permissions) => true,
            (EntityKind::Role, StepKind::Roles)
            | (EntityKind::Role, StepKind::Members)
            | (EntityKind::Role, StepKind::ServiceAccounts) => false,
        }
    }

    /// Fields this step is the sole writer of while active
    pub fn owned_fields(&self) -> &'static [Field] {
        match self {
            StepKind::Name => &[Field::Name, Field::Description],
            StepKind::Roles => &[Field::Roles],
            StepKind::Members => &[Field::Members],
            StepKind::ServiceAccounts => &[Field::ServiceAccounts],
            StepKind::Permissions => &[Field::Permissions],
            StepKind::Review => &[],
        }
    }

    pub fn owns(&self, field: Field) -> bool {
        self.owned_fields().contains(&field)
    }
}

/// A step in the resolved sequence for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDefinition {
    pub kind: StepKind,
    pub position: usize,
}

/// Compute the ordered step sequence. Pure and deterministic.
pub fn resolve(kind: EntityKind, toggles: &FeatureToggles) -> Vec<StepDefinition> {
    ORDER
        .iter()
        .filter(|step| step.is_included(kind, toggles))
        .enumerate()
        .map(|(position, step)| StepDefinition {
            kind: *step,
            position,
        })
        .collect()
}
