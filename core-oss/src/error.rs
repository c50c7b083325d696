use thiserror::Error;

/// Errors surfaced by object-storage backends.
#[derive(Error, Debug)]
pub enum OssError {
    /// The remote API answered with a non-success status
    #[error("Object storage API error (status {status_code}): {message}")]
    Api { status_code: u16, message: String },

    /// The requested object does not exist
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Transport-level failure (DNS, TLS, timeout, connection reset)
    #[error("Network error: {0}")]
    Network(String),

    /// The remote answered with a body we could not interpret
    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    /// Credentials or endpoint settings are unusable
    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, OssError>;
