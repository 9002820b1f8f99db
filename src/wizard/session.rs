use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::api::EntityKind;
use crate::config::FeatureToggles;

use super::steps::{self, StepDefinition, StepKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalFlag {
    #[default]
    None,
    InProgress,
    Success,
    Error,
}

/// One in-progress creation flow.
///
/// The toggles and the step sequence are captured at start and never
/// re-read, so the graph cannot change under the user mid-session.
#[derive(Debug, Clone)]
pub struct WizardSession {
    pub id: Uuid,
    pub kind: EntityKind,
    pub toggles: FeatureToggles,
    pub started_at: DateTime<Utc>,
    steps: Vec<StepDefinition>,
    current: usize,
    terminal: TerminalFlag,
}

impl WizardSession {
    pub fn new(kind: EntityKind, toggles: FeatureToggles) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            toggles,
            started_at: Utc::now(),
            steps: steps::resolve(kind, &toggles),
            current: 0,
            terminal: TerminalFlag::None,
        }
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step_kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(|s| s.kind).collect()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_step(&self) -> StepKind {
        // Name and Review are always present, so the sequence is never empty
        self.steps
            .get(self.current)
            .map(|s| s.kind)
            .unwrap_or(StepKind::Name)
    }

    pub fn is_first(&self) -> bool {
        self.current == 0
    }

    pub fn is_last(&self) -> bool {
        self.current + 1 >= self.steps.len()
    }

    pub fn terminal(&self) -> TerminalFlag {
        self.terminal
    }

    /// Closed after a successful (or partially successful) submission
    pub fn is_read_only(&self) -> bool {
        self.terminal == TerminalFlag::Success
    }

    pub(super) fn set_terminal(&mut self, terminal: TerminalFlag) {
        self.terminal = terminal;
    }

    pub(super) fn advance(&mut self) -> StepKind {
        if !self.is_last() {
            self.current += 1;
        }
        self.current_step()
    }

    pub(super) fn retreat(&mut self) -> StepKind {
        self.current = self.current.saturating_sub(1);
        self.current_step()
    }
}
