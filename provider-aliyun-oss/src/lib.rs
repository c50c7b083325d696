//! # Aliyun OSS Provider
//!
//! Implements the `ObjectStorage` trait for Alibaba Cloud Object Storage
//! Service.
//!
//! ## Overview
//!
//! - Virtual-hosted bucket addressing (`<bucket>.<region>.aliyuncs.com`)
//!   with optional custom endpoint
//! - OSS V1 header signing (HMAC-SHA1 over the canonical string)
//! - `ListBucketResult` XML parsing for prefix listings

pub mod connector;
pub mod error;

pub use connector::{AliyunOssConfig, AliyunOssConnector};
pub use error::AliyunOssError;
