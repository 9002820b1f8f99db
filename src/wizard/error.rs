use thiserror::Error;

use super::fields::Field;
use super::steps::StepKind;

/// Reasons the controller refuses a request. None of these change session state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WizardError {
    #[error("No wizard session is active")]
    NoSession,

    #[error("A wizard session is already active")]
    SessionActive,

    #[error("The {} step is not ready", .0.label())]
    StepNotReady(StepKind),

    #[error("Already at the last step")]
    AtLastStep,

    #[error("Already at the first step")]
    AtFirstStep,

    #[error("Field '{}' is not editable on the {} step", .field.key(), .step.label())]
    FieldNotOwned { field: Field, step: StepKind },

    #[error("Value does not fit field '{}'", .0.key())]
    FieldType(Field),

    #[error("Submit is only available on the review step")]
    NotOnReview,

    #[error("Submission in progress")]
    Submitting,

    #[error("The session is closed")]
    SessionClosed,

    #[error("The session is still open; cancel it instead")]
    SessionOpen,

    #[error("No cancel confirmation is pending")]
    NoPendingCancel,
}

pub type Result<T> = std::result::Result<T, WizardError>;
