//! # Qiniu Kodo Provider
//!
//! Implements the `ObjectStorage` trait for Qiniu Kodo.
//!
//! ## Overview
//!
//! - Form uploads to `upload.qiniup.com` with scoped upload tokens
//! - QBox-signed management calls (stat, delete, list) against the
//!   rs/rsf hosts, all JSON
//! - Downloads through the bucket's bound domain with signed private URLs

pub mod connector;
pub mod error;
pub mod types;

pub use connector::{QiniuKodoConfig, QiniuKodoConnector};
pub use error::QiniuKodoError;
