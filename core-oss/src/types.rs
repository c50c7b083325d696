//! Shared types for the object-storage abstraction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OssError;

/// Supported cloud object-storage providers.
///
/// This is a closed set; the factory in `core-sync` matches on it
/// exhaustively, so adding a variant forces every dispatch site to handle it.
///
/// # Examples
///
/// ```
/// use core_oss::ProviderKind;
///
/// let kind: ProviderKind = "aliyun_oss".parse().unwrap();
/// assert_eq!(kind.display_name(), "Aliyun OSS");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Alibaba Cloud Object Storage Service
    AliyunOss,
    /// Tencent Cloud Object Storage
    TencentCos,
    /// Qiniu Kodo object storage
    QiniuKodo,
}

impl ProviderKind {
    /// Provider identifier string used in configuration rows and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::AliyunOss => "aliyun_oss",
            ProviderKind::TencentCos => "tencent_cos",
            ProviderKind::QiniuKodo => "qiniu_kodo",
        }
    }

    /// Human-readable display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::AliyunOss => "Aliyun OSS",
            ProviderKind::TencentCos => "Tencent COS",
            ProviderKind::QiniuKodo => "Qiniu Kodo",
        }
    }

    /// All supported kinds, for validation messages and allow-lists.
    pub fn all() -> &'static [ProviderKind] {
        &[
            ProviderKind::AliyunOss,
            ProviderKind::TencentCos,
            ProviderKind::QiniuKodo,
        ]
    }
}

impl FromStr for ProviderKind {
    type Err = OssError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aliyun_oss" | "aliyun" => Ok(ProviderKind::AliyunOss),
            "tencent_cos" | "tencent" => Ok(ProviderKind::TencentCos),
            "qiniu_kodo" | "qiniu" => Ok(ProviderKind::QiniuKodo),
            _ => Err(OssError::InvalidConfig(format!(
                "unsupported provider kind: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata of one remote object, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    /// Full object key (path within the bucket)
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modification as a Unix timestamp, when the provider reports one
    pub last_modified: Option<i64>,
    /// Entity tag, provider-specific content fingerprint
    pub etag: Option<String>,
    /// MIME type, when the provider reports one
    pub content_type: Option<String>,
}

impl ObjectStat {
    /// Final path segment of the key (the remote "file name").
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in ProviderKind::all() {
            let parsed: ProviderKind = kind.as_str().parse().unwrap();
            assert_eq!(&parsed, kind);
        }
    }

    #[test]
    fn test_provider_kind_aliases() {
        assert_eq!(
            "qiniu".parse::<ProviderKind>().unwrap(),
            ProviderKind::QiniuKodo
        );
        assert_eq!(
            "TENCENT_COS".parse::<ProviderKind>().unwrap(),
            ProviderKind::TencentCos
        );
    }

    #[test]
    fn test_provider_kind_unknown() {
        assert!("aws_s3".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_object_stat_file_name() {
        let stat = ObjectStat {
            key: "attachments/2024/01/02/report.pdf".to_string(),
            size: 10,
            last_modified: None,
            etag: None,
            content_type: None,
        };
        assert_eq!(stat.file_name(), "report.pdf");

        let flat = ObjectStat {
            key: "report.pdf".to_string(),
            size: 10,
            last_modified: None,
            etag: None,
            content_type: None,
        };
        assert_eq!(flat.file_name(), "report.pdf");
    }
}
