//! # Object Storage Abstraction
//!
//! One capability contract over three incompatible cloud object-storage
//! APIs.
//!
//! ## Overview
//!
//! This crate defines:
//! - **[`ObjectStorage`]**: the provider trait (upload, download, delete,
//!   exists, stat, list, test-connection)
//! - **[`ProviderKind`]**: the closed set of supported vendors
//! - **[`HttpClient`]**: the transport seam the connectors are written
//!   against, with a production [`ReqwestHttpClient`]
//! - **[`xml`]**: shared field extraction for vendors that answer in XML
//!
//! The concrete connectors live in the `provider-*` crates; the factory that
//! selects one from a stored configuration lives in `core-sync`.

pub mod client;
pub mod error;
pub mod http;
pub mod provider;
pub mod types;
pub mod xml;

pub use client::ReqwestHttpClient;
pub use error::{OssError, Result};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use provider::ObjectStorage;
pub use types::{ObjectStat, ProviderKind};
