//! Deterministic remote key generation.
//!
//! The layout is selected by the configuration's `keep_structure` flag:
//!
//! - structure-preserving: `<prefix>/<original name>`
//! - date-sharded: `<prefix>/YYYY/MM/DD/<file-id><.ext>`, using the
//!   record's creation date so the key never drifts between calls

use chrono::{TimeZone, Utc};
use core_vault::FileRecord;

use crate::config_store::RemoteStorageConfig;

/// Compute the remote object key for a record under a configuration.
pub fn remote_key(config: &RemoteStorageConfig, record: &FileRecord) -> String {
    let prefix = config.sync_prefix.trim_matches('/');

    let suffix = if config.keep_structure {
        record.name.trim_start_matches('/').to_string()
    } else {
        let created = Utc
            .timestamp_opt(record.created_at, 0)
            .single()
            .unwrap_or_else(Utc::now);

        let ext = if record.format.is_empty() {
            String::new()
        } else {
            format!(".{}", record.format)
        };

        format!(
            "{}/{}{}",
            created.format("%Y/%m/%d"),
            record.id,
            ext
        )
    };

    if prefix.is_empty() {
        suffix
    } else {
        format!("{}/{}", prefix, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::ConfigId;
    use core_oss::ProviderKind;

    fn config(prefix: &str, keep_structure: bool) -> RemoteStorageConfig {
        RemoteStorageConfig {
            id: ConfigId::new(),
            name: "primary".to_string(),
            provider: ProviderKind::AliyunOss,
            region: "r".to_string(),
            bucket: "b".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
            endpoint: None,
            active: true,
            enabled: true,
            auto_sync: false,
            sync_prefix: prefix.to_string(),
            keep_structure,
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    fn record(name: &str, format: &str) -> FileRecord {
        let mut record = FileRecord::new(name, "aa11", format, 5, "aa/aa11");
        // 2024-03-05T00:00:00Z
        record.created_at = 1_709_596_800;
        record
    }

    #[test]
    fn test_date_sharded_key() {
        let record = record("report.pdf", "pdf");
        let key = remote_key(&config("sync", false), &record);

        assert_eq!(key, format!("sync/2024/03/05/{}.pdf", record.id));
    }

    #[test]
    fn test_date_sharded_without_extension() {
        let record = record("README", "");
        let key = remote_key(&config("sync", false), &record);
        assert_eq!(key, format!("sync/2024/03/05/{}", record.id));
    }

    #[test]
    fn test_structure_preserving_key() {
        let record = record("docs/notes/report.pdf", "pdf");
        let key = remote_key(&config("mirror", true), &record);
        assert_eq!(key, "mirror/docs/notes/report.pdf");
    }

    #[test]
    fn test_empty_prefix() {
        let record = record("report.pdf", "pdf");
        let key = remote_key(&config("", true), &record);
        assert_eq!(key, "report.pdf");
    }

    #[test]
    fn test_key_is_deterministic() {
        let record = record("report.pdf", "pdf");
        let cfg = config("sync", false);
        assert_eq!(remote_key(&cfg, &record), remote_key(&cfg, &record));
    }
}
