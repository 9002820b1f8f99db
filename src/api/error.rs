use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("{0}")]
    Rejected(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;
