//! Provider factory.
//!
//! Builds the concrete `ObjectStorage` connector for a stored
//! configuration. The match on `ProviderKind` is exhaustive, so an
//! unsupported vendor cannot get past construction; configurations with a
//! kind this build does not recognize already fail when the row is read
//! (`SyncError::UnsupportedProvider`).

use std::sync::Arc;

use core_oss::{HttpClient, ObjectStorage, ProviderKind};
use provider_aliyun_oss::{AliyunOssConfig, AliyunOssConnector};
use provider_qiniu_kodo::{QiniuKodoConfig, QiniuKodoConnector};
use provider_tencent_cos::{TencentCosConfig, TencentCosConnector};

use crate::config_store::RemoteStorageConfig;
use crate::{Result, SyncError};

/// Build a connector for `config`.
///
/// # Errors
///
/// - [`SyncError::InvalidInput`] when the configuration is disabled or
///   missing a provider-required field
pub fn create_provider(
    config: &RemoteStorageConfig,
    http_client: Arc<dyn HttpClient>,
) -> Result<Arc<dyn ObjectStorage>> {
    if !config.enabled {
        return Err(SyncError::InvalidInput {
            field: "enabled".to_string(),
            message: format!("configuration '{}' is disabled", config.name),
        });
    }

    let provider: Arc<dyn ObjectStorage> = match config.provider {
        ProviderKind::AliyunOss => Arc::new(AliyunOssConnector::new(
            http_client,
            AliyunOssConfig {
                access_key_id: config.access_key.clone(),
                access_key_secret: config.secret_key.clone(),
                bucket: config.bucket.clone(),
                region: config.region.clone(),
                endpoint: config.endpoint.clone(),
            },
        )),
        ProviderKind::TencentCos => Arc::new(TencentCosConnector::new(
            http_client,
            TencentCosConfig {
                secret_id: config.access_key.clone(),
                secret_key: config.secret_key.clone(),
                bucket: config.bucket.clone(),
                region: config.region.clone(),
                endpoint: config.endpoint.clone(),
            },
        )),
        ProviderKind::QiniuKodo => {
            let domain = config
                .endpoint
                .clone()
                .filter(|e| !e.trim().is_empty())
                .ok_or_else(|| SyncError::InvalidInput {
                    field: "endpoint".to_string(),
                    message: "Qiniu Kodo requires a download domain".to_string(),
                })?;

            Arc::new(QiniuKodoConnector::new(
                http_client,
                QiniuKodoConfig {
                    access_key: config.access_key.clone(),
                    secret_key: config.secret_key.clone(),
                    bucket: config.bucket.clone(),
                    download_domain: domain,
                },
            ))
        }
    };

    Ok(provider)
}
