//! Error types for the Qiniu Kodo provider

use core_oss::OssError;
use thiserror::Error;

/// Qiniu Kodo provider errors
#[derive(Error, Debug)]
pub enum QiniuKodoError {
    /// API request returned an error status
    #[error("Qiniu Kodo API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Entry does not exist (Qiniu status 612)
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Failed to parse an API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

impl From<QiniuKodoError> for OssError {
    fn from(error: QiniuKodoError) -> Self {
        match error {
            QiniuKodoError::ApiError {
                status_code,
                message,
            } => OssError::Api {
                status_code,
                message,
            },
            QiniuKodoError::ObjectNotFound(key) => OssError::ObjectNotFound(key),
            QiniuKodoError::ParseError(msg) => OssError::Parse(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let error = QiniuKodoError::ObjectNotFound("a.txt".to_string());
        assert!(matches!(
            OssError::from(error),
            OssError::ObjectNotFound(_)
        ));
    }
}
