//! Aliyun OSS connector implementation
//!
//! Implements the `ObjectStorage` trait against the Aliyun OSS REST API
//! using header-based HMAC-SHA1 request signing.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use core_oss::{HttpClient, HttpMethod, HttpRequest, ObjectStat, ObjectStorage, Result};
use core_oss::xml;

use crate::error::AliyunOssError;

type HmacSha1 = Hmac<Sha1>;

/// Connection settings for one OSS bucket.
#[derive(Debug, Clone)]
pub struct AliyunOssConfig {
    /// RAM access key ID
    pub access_key_id: String,
    /// RAM access key secret
    pub access_key_secret: String,
    /// Bucket name
    pub bucket: String,
    /// Region endpoint prefix, e.g. `oss-cn-hangzhou`
    pub region: String,
    /// Custom endpoint host overriding `<bucket>.<region>.aliyuncs.com`
    pub endpoint: Option<String>,
}

/// Aliyun OSS connector.
///
/// Requests are signed with the OSS V1 header scheme:
/// `Authorization: OSS <AccessKeyId>:<base64(hmac-sha1(secret, canonical))>`
/// over `VERB\nContent-MD5\nContent-Type\nDate\nCanonicalizedResource`.
pub struct AliyunOssConnector {
    http_client: Arc<dyn HttpClient>,
    config: AliyunOssConfig,
}

impl AliyunOssConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, config: AliyunOssConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Virtual-hosted bucket host.
    fn host(&self) -> String {
        match &self.config.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "{}.{}.aliyuncs.com",
                self.config.bucket, self.config.region
            ),
        }
    }

    /// Percent-encode an object key, preserving path separators.
    fn encode_key(key: &str) -> String {
        key.split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn object_url(&self, key: &str) -> String {
        format!("https://{}/{}", self.host(), Self::encode_key(key))
    }

    /// RFC 1123 date required by the `Date` header and the signature.
    fn http_date() -> String {
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
    }

    fn sign(&self, verb: &str, content_type: &str, date: &str, resource: &str) -> String {
        let string_to_sign = format!("{}\n\n{}\n{}\n{}", verb, content_type, date, resource);

        let mut mac = HmacSha1::new_from_slice(self.config.access_key_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());

        format!(
            "OSS {}:{}",
            self.config.access_key_id,
            STANDARD.encode(mac.finalize().into_bytes())
        )
    }

    /// Build a signed request for an object operation.
    fn signed_request(
        &self,
        method: HttpMethod,
        key: &str,
        content_type: &str,
        body: Option<Bytes>,
    ) -> HttpRequest {
        let date = Self::http_date();
        let resource = format!("/{}/{}", self.config.bucket, key);
        let authorization = self.sign(method.as_str(), content_type, &date, &resource);

        let mut request = HttpRequest::new(method, self.object_url(key))
            .header("Date", date)
            .header("Authorization", authorization);

        if !content_type.is_empty() {
            request = request.header("Content-Type", content_type);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        request
    }

    fn parse_listing(body: &str) -> Result<Vec<ObjectStat>> {
        let mut stats = Vec::new();

        for block in xml::blocks_of(body, "Contents") {
            let key = xml::text_of(block, "Key").map(xml::unescape).ok_or_else(|| {
                AliyunOssError::ParseError("Contents entry without Key".to_string())
            })?;

            let size = xml::text_of(block, "Size")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(0);

            let last_modified = xml::text_of(block, "LastModified")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc).timestamp());

            let etag = xml::text_of(block, "ETag").map(|e| e.trim_matches('"').to_string());

            stats.push(ObjectStat {
                key,
                size,
                last_modified,
                etag,
                content_type: None,
            });
        }

        Ok(stats)
    }
}

#[async_trait]
impl ObjectStorage for AliyunOssConnector {
    #[instrument(skip(self, data), fields(key = %key, bytes = data.len()))]
    async fn upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let request = self.signed_request(HttpMethod::Put, key, content_type, Some(data));
        let response = self.http_client.execute(request).await?;

        if response.is_success() {
            debug!("Object uploaded");
            Ok(())
        } else {
            warn!(status = response.status, "Upload failed");
            Err(AliyunOssError::ApiError {
                status_code: response.status,
                message: response.text(),
            }
            .into())
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn download(&self, key: &str) -> Result<Bytes> {
        let request = self.signed_request(HttpMethod::Get, key, "", None);
        let response = self.http_client.execute(request).await?;

        match response.status {
            status if (200..300).contains(&status) => Ok(response.body),
            404 => Err(AliyunOssError::ObjectNotFound(key.to_string()).into()),
            status => Err(AliyunOssError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let request = self.signed_request(HttpMethod::Delete, key, "", None);
        let response = self.http_client.execute(request).await?;

        // OSS answers 204 on success; a missing object is not an error.
        match response.status {
            status if (200..300).contains(&status) => Ok(()),
            404 => Ok(()),
            status => Err(AliyunOssError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn exists(&self, key: &str) -> Result<bool> {
        let request = self.signed_request(HttpMethod::Head, key, "", None);
        let response = self.http_client.execute(request).await?;

        match response.status {
            status if (200..300).contains(&status) => Ok(true),
            404 => Ok(false),
            status => Err(AliyunOssError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn stat(&self, key: &str) -> Result<ObjectStat> {
        let request = self.signed_request(HttpMethod::Head, key, "", None);
        let response = self.http_client.execute(request).await?;

        match response.status {
            status if (200..300).contains(&status) => {
                let size = response
                    .header("Content-Length")
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);

                let last_modified = response
                    .header("Last-Modified")
                    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                    .map(|dt| dt.with_timezone(&Utc).timestamp());

                Ok(ObjectStat {
                    key: key.to_string(),
                    size,
                    last_modified,
                    etag: response
                        .header("ETag")
                        .map(|e| e.trim_matches('"').to_string()),
                    content_type: response.header("Content-Type").map(str::to_string),
                })
            }
            404 => Err(AliyunOssError::ObjectNotFound(key.to_string()).into()),
            status => Err(AliyunOssError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(prefix = %prefix, max = max))]
    async fn list(&self, prefix: &str, max: u32) -> Result<Vec<ObjectStat>> {
        let date = Self::http_date();
        // Listing parameters are not part of the canonicalized resource.
        let resource = format!("/{}/", self.config.bucket);
        let authorization = self.sign("GET", "", &date, &resource);

        let url = format!(
            "https://{}/?prefix={}&max-keys={}",
            self.host(),
            urlencoding::encode(prefix),
            max
        );

        let request = HttpRequest::new(HttpMethod::Get, url)
            .header("Date", date)
            .header("Authorization", authorization);

        let response = self.http_client.execute(request).await?;

        if !response.is_success() {
            return Err(AliyunOssError::ApiError {
                status_code: response.status,
                message: response.text(),
            }
            .into());
        }

        let stats = Self::parse_listing(&response.text())?;
        debug!(count = stats.len(), "Listed objects");
        Ok(stats)
    }

    async fn test_connection(&self) -> Result<()> {
        self.list("", 1).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_oss::HttpResponse;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    fn config() -> AliyunOssConfig {
        AliyunOssConfig {
            access_key_id: "test-ak".to_string(),
            access_key_secret: "test-secret".to_string(),
            bucket: "notes".to_string(),
            region: "oss-cn-hangzhou".to_string(),
            endpoint: None,
        }
    }

    fn response(status: u16, body: &[u8]) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::copy_from_slice(body),
        }
    }

    #[test]
    fn test_host_and_key_encoding() {
        let connector = AliyunOssConnector::new(Arc::new(MockHttpClient::new()), config());
        assert_eq!(connector.host(), "notes.oss-cn-hangzhou.aliyuncs.com");
        assert_eq!(
            AliyunOssConnector::encode_key("sync/2024/my file.txt"),
            "sync/2024/my%20file.txt"
        );
    }

    #[test]
    fn test_custom_endpoint() {
        let mut cfg = config();
        cfg.endpoint = Some("oss.internal.example.com".to_string());
        let connector = AliyunOssConnector::new(Arc::new(MockHttpClient::new()), cfg);
        assert_eq!(connector.host(), "oss.internal.example.com");
    }

    #[test]
    fn test_signature_is_deterministic() {
        let connector = AliyunOssConnector::new(Arc::new(MockHttpClient::new()), config());
        let date = "Mon, 01 Jan 2024 00:00:00 GMT";
        let a = connector.sign("PUT", "text/plain", date, "/notes/sync/a.txt");
        let b = connector.sign("PUT", "text/plain", date, "/notes/sync/a.txt");

        assert_eq!(a, b);
        assert!(a.starts_with("OSS test-ak:"));
    }

    #[tokio::test]
    async fn test_upload_success() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Put);
            assert!(req
                .url
                .starts_with("https://notes.oss-cn-hangzhou.aliyuncs.com/sync/a.txt"));
            assert!(req.headers.contains_key("Authorization"));
            assert!(req.headers.contains_key("Date"));
            assert_eq!(
                req.headers.get("Content-Type"),
                Some(&"text/plain".to_string())
            );
            Ok(response(200, b""))
        });

        let connector = AliyunOssConnector::new(Arc::new(mock_http), config());
        connector
            .upload("sync/a.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, b"NoSuchKey")));

        let connector = AliyunOssConnector::new(Arc::new(mock_http), config());
        let result = connector.download("missing.txt").await;
        assert!(matches!(
            result,
            Err(core_oss::OssError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_exists_distinguishes_missing_from_error() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, b"")));

        let connector = AliyunOssConnector::new(Arc::new(mock_http), config());
        assert!(!connector.exists("missing.txt").await.unwrap());

        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(403, b"AccessDenied")));

        let connector = AliyunOssConnector::new(Arc::new(mock_http), config());
        assert!(connector.exists("secret.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, b"")));

        let connector = AliyunOssConnector::new(Arc::new(mock_http), config());
        connector.delete("missing.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_stat_parses_headers() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|_| {
            let mut headers = HashMap::new();
            headers.insert("Content-Length".to_string(), "5".to_string());
            headers.insert(
                "Last-Modified".to_string(),
                "Mon, 01 Jan 2024 00:00:00 GMT".to_string(),
            );
            headers.insert("ETag".to_string(), "\"abc123\"".to_string());
            headers.insert("Content-Type".to_string(), "text/plain".to_string());
            Ok(HttpResponse {
                status: 200,
                headers,
                body: Bytes::new(),
            })
        });

        let connector = AliyunOssConnector::new(Arc::new(mock_http), config());
        let stat = connector.stat("sync/a.txt").await.unwrap();

        assert_eq!(stat.key, "sync/a.txt");
        assert_eq!(stat.size, 5);
        assert_eq!(stat.etag.as_deref(), Some("abc123"));
        assert_eq!(stat.last_modified, Some(1_704_067_200));
    }

    #[tokio::test]
    async fn test_list_parses_xml() {
        let body = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>notes</Name>
  <Contents>
    <Key>sync/a.txt</Key>
    <LastModified>2024-01-01T00:00:00.000Z</LastModified>
    <ETag>"abc"</ETag>
    <Size>5</Size>
  </Contents>
  <Contents>
    <Key>sync/b.png</Key>
    <LastModified>2024-01-02T00:00:00.000Z</LastModified>
    <ETag>"def"</ETag>
    <Size>42</Size>
  </Contents>
</ListBucketResult>"#;

        let mut mock_http = MockHttpClient::new();
        let body_vec = body.to_vec();
        mock_http.expect_execute().times(1).returning(move |req| {
            assert!(req.url.contains("prefix=sync%2F"));
            assert!(req.url.contains("max-keys=100"));
            Ok(response(200, &body_vec))
        });

        let connector = AliyunOssConnector::new(Arc::new(mock_http), config());
        let stats = connector.list("sync/", 100).await.unwrap();

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].key, "sync/a.txt");
        assert_eq!(stats[0].size, 5);
        assert_eq!(stats[1].key, "sync/b.png");
        assert_eq!(stats[1].etag.as_deref(), Some("def"));
    }
}
