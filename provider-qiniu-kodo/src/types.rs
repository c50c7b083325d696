//! Qiniu API response types
//!
//! Data structures for deserializing Qiniu rs/rsf management API responses.

use serde::{Deserialize, Serialize};

/// `GET /stat/<entry>` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatResponse {
    /// File size in bytes
    pub fsize: u64,

    /// Qiniu content hash (etag)
    pub hash: String,

    /// MIME type
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,

    /// Upload time in units of 100 nanoseconds since the Unix epoch
    #[serde(rename = "putTime")]
    pub put_time: Option<i64>,
}

/// One entry of a `GET /list` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListItem {
    pub key: String,
    pub fsize: u64,
    pub hash: Option<String>,

    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,

    #[serde(rename = "putTime")]
    pub put_time: Option<i64>,
}

/// `GET /list` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub items: Vec<ListItem>,

    /// Continuation marker for the next page
    pub marker: Option<String>,
}

/// Upload policy serialized into the upload token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutPolicy {
    /// `<bucket>:<key>` scope restricting the token to one entry
    pub scope: String,

    /// Unix timestamp after which the token is rejected
    pub deadline: i64,
}

/// Convert Qiniu `putTime` (100ns units) to Unix seconds.
pub fn put_time_to_unix(put_time: i64) -> i64 {
    put_time / 10_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_time_conversion() {
        // 2024-01-01T00:00:00Z in 100ns units
        assert_eq!(put_time_to_unix(17_040_672_000_000_000), 1_704_067_200);
    }

    #[test]
    fn test_list_response_parsing() {
        let json = r#"{
            "items": [
                {"key": "sync/a.txt", "fsize": 5, "hash": "Fh8x", "mimeType": "text/plain", "putTime": 17040672000000000}
            ],
            "marker": null
        }"#;

        let parsed: ListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].key, "sync/a.txt");
        assert!(parsed.marker.is_none());
    }
}
