//! Error types for the Tencent COS provider

use core_oss::OssError;
use thiserror::Error;

/// Tencent COS provider errors
#[derive(Error, Debug)]
pub enum TencentCosError {
    /// API request returned an error status
    #[error("Tencent COS API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Object does not exist
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Failed to parse an API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

impl From<TencentCosError> for OssError {
    fn from(error: TencentCosError) -> Self {
        match error {
            TencentCosError::ApiError {
                status_code,
                message,
            } => OssError::Api {
                status_code,
                message,
            },
            TencentCosError::ObjectNotFound(key) => OssError::ObjectNotFound(key),
            TencentCosError::ParseError(msg) => OssError::Parse(msg),
        }
    }
}
