use thiserror::Error;
use unitrade_types::FieldErrors;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error payload; `message` is its text.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// Form fields the server rejected.
    #[error("Please fix the highlighted fields")]
    Validation(FieldErrors),

    #[error("Not signed in")]
    Unauthorized,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
