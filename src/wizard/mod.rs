mod error;
mod fields;
mod pipeline;
mod session;
mod steps;
mod validator;
mod view;

pub use error::{Result, WizardError};
pub use fields::{Field, FieldStore, FieldValue, FieldValues, Selection};
pub use pipeline::{
    Association, Phase, PipelineResult, StageKind, StagePayload, StageStatus, Submission,
    SubmissionPipeline, SubmissionStage,
};
pub use session::{TerminalFlag, WizardSession};
pub use steps::{StepDefinition, StepKind, resolve};
pub use validator::{NAME_MAX_LENGTH, RejectReason, UniquenessValidator, ValidationOutcome};
pub use view::WizardView;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{AccessApi, EntityKind};
use crate::config::{FeatureToggles, WizardTimings};

/// Results delivered from background tasks back to the controller
#[derive(Debug, Clone)]
pub enum WizardMessage {
    NameValidated {
        session: Uuid,
        ticket: u64,
        name: String,
        outcome: ValidationOutcome,
    },
    Progress(PipelineResult),
}

impl From<PipelineResult> for WizardMessage {
    fn from(result: PipelineResult) -> Self {
        WizardMessage::Progress(result)
    }
}

/// Owns the lifecycle of one creation wizard at a time
pub struct WizardController {
    api: Arc<dyn AccessApi>,
    timings: WizardTimings,

    session: Option<WizardSession>,
    fields: FieldStore,

    // Name validation
    validator: Option<Arc<UniquenessValidator>>,
    name_outcome: ValidationOutcome,
    name_ticket: u64,
    validation_in_flight: bool,

    // Cancel confirmation
    cancel_pending: bool,

    // Submission
    submitting: bool,
    progress: Option<PipelineResult>,
    progress_tx: watch::Sender<Option<PipelineResult>>,

    tx: mpsc::UnboundedSender<WizardMessage>,
    rx: mpsc::UnboundedReceiver<WizardMessage>,
}

impl WizardController {
    pub fn new(api: Arc<dyn AccessApi>, timings: WizardTimings) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (progress_tx, _) = watch::channel(None);
        Self {
            api,
            timings,
            session: None,
            fields: FieldStore::new(),
            validator: None,
            name_outcome: ValidationOutcome::Pending,
            name_ticket: 0,
            validation_in_flight: false,
            cancel_pending: false,
            submitting: false,
            progress: None,
            progress_tx,
            tx,
            rx,
        }
    }

    /// Open a new session. The toggles are frozen for its whole lifetime.
    pub fn start(&mut self, kind: EntityKind, toggles: FeatureToggles) -> Result<&WizardSession> {
        if self.session.is_some() {
            return Err(WizardError::SessionActive);
        }

        self.reset();
        self.validator = Some(Arc::new(UniquenessValidator::new(
            Arc::clone(&self.api),
            kind,
            self.timings.debounce,
            self.timings.lookup_timeout,
        )));

        let session = WizardSession::new(kind, toggles);
        info!(
            "Started {} wizard {} with steps {:?}",
            kind,
            session.id,
            session.step_kinds()
        );
        Ok(self.session.insert(session))
    }

    pub fn session(&self) -> Option<&WizardSession> {
        self.session.as_ref()
    }

    pub fn current_step(&self) -> Option<StepKind> {
        self.session.as_ref().map(WizardSession::current_step)
    }

    pub fn name_outcome(&self) -> &ValidationOutcome {
        &self.name_outcome
    }

    /// Follow the validator's latest honored outcome for the active session
    pub fn subscribe_name_outcome(&self) -> Option<watch::Receiver<ValidationOutcome>> {
        self.validator.as_ref().map(|v| v.subscribe())
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn progress(&self) -> Option<&PipelineResult> {
        self.progress.as_ref()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<PipelineResult>> {
        self.progress_tx.subscribe()
    }

    pub fn cancel_confirmation_open(&self) -> bool {
        self.cancel_pending
    }

    fn active(&self) -> Result<&WizardSession> {
        self.session.as_ref().ok_or(WizardError::NoSession)
    }

    /// Session that may still change: not submitting and not closed
    fn editable(&mut self) -> Result<&mut WizardSession> {
        if self.submitting {
            return Err(WizardError::Submitting);
        }
        let session = self.session.as_mut().ok_or(WizardError::NoSession)?;
        if session.is_read_only() {
            return Err(WizardError::SessionClosed);
        }
        Ok(session)
    }

    fn is_step_ready(&self, step: StepKind) -> bool {
        match step {
            StepKind::Name => self.name_outcome.is_available() && !self.validation_in_flight,
            StepKind::Permissions => self
                .fields
                .selection(Field::Permissions)
                .is_some_and(|s| !s.is_empty()),
            StepKind::Roles | StepKind::Members | StepKind::ServiceAccounts | StepKind::Review => {
                true
            }
        }
    }

    pub fn can_go_next(&self) -> bool {
        match &self.session {
            Some(session) => {
                !self.submitting
                    && !session.is_read_only()
                    && !session.is_last()
                    && self.is_step_ready(session.current_step())
            }
            None => false,
        }
    }

    pub fn go_next(&mut self) -> Result<StepKind> {
        let step = self.active()?.current_step();
        let ready = self.is_step_ready(step);
        let session = self.editable()?;
        if !ready {
            debug!("Refusing to leave {} step: not ready", step.label());
            return Err(WizardError::StepNotReady(step));
        }
        if session.is_last() {
            return Err(WizardError::AtLastStep);
        }
        Ok(session.advance())
    }

    pub fn go_back(&mut self) -> Result<StepKind> {
        let session = self.editable()?;
        if session.is_first() {
            return Err(WizardError::AtFirstStep);
        }
        Ok(session.retreat())
    }

    pub fn field(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Everything entered so far, for the review step
    pub fn values(&self) -> FieldValues {
        self.fields.snapshot()
    }

    /// Write a field owned by the active step. Editing the name re-validates it.
    pub fn set_field(&mut self, field: Field, value: FieldValue) -> Result<()> {
        let step = self.editable()?.current_step();
        if !step.owns(field) {
            return Err(WizardError::FieldNotOwned { field, step });
        }
        self.fields.set(field, value)?;

        if field == Field::Name {
            self.revalidate_name();
        }
        Ok(())
    }

    fn revalidate_name(&mut self) {
        let (Some(session), Some(validator)) = (&self.session, &self.validator) else {
            return;
        };
        let name = self.fields.text(Field::Name).unwrap_or_default().trim().to_string();
        let session = session.id;
        let validator = Arc::clone(validator);
        let ticket = validator.issue();
        let tx = self.tx.clone();

        self.name_outcome = ValidationOutcome::Pending;
        self.name_ticket = ticket;
        self.validation_in_flight = true;

        tokio::spawn(async move {
            if let Some(outcome) = validator.check(ticket, &name).await {
                let _ = tx.send(WizardMessage::NameValidated {
                    session,
                    ticket,
                    name,
                    outcome,
                });
            }
        });
    }

    /// Raise the cancel confirmation. Nothing is discarded yet.
    pub fn request_cancel(&mut self) -> Result<()> {
        self.active()?;
        if self.submitting {
            return Err(WizardError::Submitting);
        }
        self.cancel_pending = true;
        Ok(())
    }

    /// Close the confirmation and keep editing
    pub fn decline_cancel(&mut self) -> Result<()> {
        if !self.cancel_pending {
            return Err(WizardError::NoPendingCancel);
        }
        self.cancel_pending = false;
        Ok(())
    }

    /// Destroy the session. The caller navigates away on `Ok`.
    pub fn confirm_cancel(&mut self) -> Result<()> {
        if !self.cancel_pending {
            return Err(WizardError::NoPendingCancel);
        }
        if let Some(session) = &self.session {
            info!("Cancelled {} wizard {}", session.kind, session.id);
        }
        self.end_session();
        Ok(())
    }

    /// Leave a session that finished submitting
    pub fn close(&mut self) -> Result<()> {
        let session = self.active()?;
        if !session.is_read_only() {
            return Err(WizardError::SessionOpen);
        }
        info!("Closed {} wizard {}", session.kind, session.id);
        self.end_session();
        Ok(())
    }

    /// Submit from the review step. Progress arrives as [`WizardMessage::Progress`].
    pub fn submit(&mut self) -> Result<()> {
        let session = self.editable()?;
        if session.current_step() != StepKind::Review {
            return Err(WizardError::NotOnReview);
        }
        session.set_terminal(TerminalFlag::InProgress);
        let (id, kind, steps) = (session.id, session.kind, session.step_kinds());

        let submission = Submission {
            kind,
            values: self.fields.snapshot(),
            steps,
        };
        info!(
            "Submitting {} '{}' from wizard {}",
            submission.kind, submission.values.name, id
        );

        self.submitting = true;
        self.cancel_pending = false;
        self.progress = None;

        let pipeline = SubmissionPipeline::new(Arc::clone(&self.api), self.timings.stage_timeout);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            pipeline.run(submission, &tx).await;
        });
        Ok(())
    }

    /// Apply a message from a background task
    pub fn handle_message(&mut self, msg: WizardMessage) {
        match msg {
            WizardMessage::NameValidated {
                session,
                ticket,
                name,
                outcome,
            } => {
                // A newer edit may have re-entered the same text, so the ticket decides
                let current = self.session.as_ref().map(|s| s.id);
                if current != Some(session) || ticket != self.name_ticket {
                    debug!("Ignoring validation #{} for {:?}", ticket, name);
                    return;
                }
                self.name_outcome = outcome;
                self.validation_in_flight = false;
            }
            WizardMessage::Progress(result) => {
                if !self.submitting {
                    return;
                }
                if result.is_terminal() {
                    self.finish_submission(&result);
                }
                self.progress_tx.send_replace(Some(result.clone()));
                self.progress = Some(result);
            }
        }
    }

    fn finish_submission(&mut self, result: &PipelineResult) {
        self.submitting = false;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match result.phase {
            Phase::Succeeded => {
                info!("Wizard {} finished", session.id);
                session.set_terminal(TerminalFlag::Success);
            }
            Phase::PartialFailure => {
                warn!(
                    "Wizard {} created the parent but failed to attach {:?}",
                    session.id,
                    result.failed_associations()
                );
                session.set_terminal(TerminalFlag::Success);
            }
            Phase::TotalFailure => {
                warn!("Wizard {} failed to create the parent", session.id);
                session.set_terminal(TerminalFlag::Error);
            }
            Phase::CreatingParent | Phase::AttachingAssociations => {}
        }
    }

    /// Wait for the next background message without applying it
    pub async fn recv(&mut self) -> Option<WizardMessage> {
        self.rx.recv().await
    }

    /// Apply messages until the current name has a settled outcome
    pub async fn wait_for_validation(&mut self) -> ValidationOutcome {
        while self.validation_in_flight {
            match self.rx.recv().await {
                Some(msg) => self.handle_message(msg),
                None => break,
            }
        }
        self.name_outcome.clone()
    }

    /// Apply messages until the pipeline reaches a terminal state
    pub async fn wait_for_submission(&mut self) -> Option<PipelineResult> {
        while self.submitting {
            match self.rx.recv().await {
                Some(msg) => self.handle_message(msg),
                None => break,
            }
        }
        self.progress.clone()
    }

    pub fn view(&self) -> Option<WizardView> {
        let session = self.session.as_ref()?;
        Some(WizardView {
            kind: session.kind,
            step: session.current_step(),
            position: (session.current_index(), session.steps().len()),
            can_go_next: self.can_go_next(),
            can_submit: !self.submitting
                && !session.is_read_only()
                && session.current_step() == StepKind::Review,
            cancel_confirmation_open: self.cancel_pending,
            name_message: self.name_outcome.message(session.kind),
            progress: self.progress.clone(),
            read_only: session.is_read_only(),
        })
    }

    fn end_session(&mut self) {
        self.session = None;
        self.reset();
    }

    fn reset(&mut self) {
        self.fields.clear();
        self.validator = None;
        self.name_outcome = ValidationOutcome::Pending;
        self.name_ticket = 0;
        self.validation_in_flight = false;
        self.cancel_pending = false;
        self.submitting = false;
        self.progress = None;
        self.progress_tx.send_replace(None);
    }
}
