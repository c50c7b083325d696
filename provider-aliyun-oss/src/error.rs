//! Error types for the Aliyun OSS provider

use core_oss::OssError;
use thiserror::Error;

/// Aliyun OSS provider errors
#[derive(Error, Debug)]
pub enum AliyunOssError {
    /// API request returned an error status
    #[error("Aliyun OSS API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Object does not exist
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Failed to parse an API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),
}

impl From<AliyunOssError> for OssError {
    fn from(error: AliyunOssError) -> Self {
        match error {
            AliyunOssError::ApiError {
                status_code,
                message,
            } => OssError::Api {
                status_code,
                message,
            },
            AliyunOssError::ObjectNotFound(key) => OssError::ObjectNotFound(key),
            AliyunOssError::ParseError(msg) => OssError::Parse(msg),
        }
    }
}
