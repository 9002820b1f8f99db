use crate::api::EntityKind;

use super::pipeline::PipelineResult;
use super::steps::StepKind;

/// What the presentation layer needs to render the active step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardView {
    pub kind: EntityKind,
    pub step: StepKind,
    /// Zero-based index and total step count
    pub position: (usize, usize),
    pub can_go_next: bool,
    pub can_submit: bool,
    pub cancel_confirmation_open: bool,
    /// Field-level message for the name input
    pub name_message: Option<String>,
    pub progress: Option<PipelineResult>,
    pub read_only: bool,
}

impl WizardView {
    pub fn heading(&self) -> String {
        format!(
            "Create {}: step {} of {}, {}",
            self.kind,
            self.position.0 + 1,
            self.position.1,
            self.step.title()
        )
    }

    /// "1 of 2" style label while submitting or after
    pub fn progress_label(&self) -> Option<String> {
        self.progress.as_ref().map(|p| {
            let (current, total) = p.progress();
            format!("{current} of {total}")
        })
    }

    pub fn terminal_message(&self) -> Option<String> {
        self.progress.as_ref().and_then(PipelineResult::message)
    }

    /// Hint line describing what input is expected right now
    pub fn hint(&self) -> String {
        if self.cancel_confirmation_open {
            return format!("Discard this {}? Entered values will be lost", self.kind);
        }
        if let Some(progress) = &self.progress {
            if !progress.is_terminal() {
                return "Submitting, please wait".to_string();
            }
        }
        if self.read_only {
            return "Done. Close to return to the list".to_string();
        }

        match self.step {
            StepKind::Name => {
                if self.can_go_next {
                    "Name is available. Next to continue".to_string()
                } else {
                    "Enter a unique name".to_string()
                }
            }
            StepKind::Roles => "Select roles to add (optional)".to_string(),
            StepKind::Members => "Select members to add (optional)".to_string(),
            StepKind::ServiceAccounts => "Select service accounts to add (optional)".to_string(),
            StepKind::Permissions => {
                if self.can_go_next {
                    "Next to review".to_string()
                } else {
                    "Select at least one permission".to_string()
                }
            }
            StepKind::Review => "Review the details and submit".to_string(),
        }
    }
}
