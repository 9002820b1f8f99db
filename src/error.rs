use thiserror::Error;

use crate::api::ApiError;
use crate::wizard::WizardError;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Wizard(#[from] WizardError),

    #[error("{0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
