use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Credential error: {0}")]
    Auth(#[from] AuthError),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    #[error("Assignment not found: {0}")]
    AssignmentNotFound(String),
}

/// Backend/object-storage related errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Credential error: {0}")]
    Auth(#[from] AuthError),
}

/// Credential-provider errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No bearer credential available: {0}")]
    Missing(String),
}
