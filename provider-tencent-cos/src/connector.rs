//! Tencent COS connector implementation
//!
//! Implements the `ObjectStorage` trait against the Tencent Cloud Object
//! Storage XML API using the q-signature scheme.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use core_oss::xml;
use core_oss::{HttpClient, HttpMethod, HttpRequest, ObjectStat, ObjectStorage, Result};

use crate::error::TencentCosError;

type HmacSha1 = Hmac<Sha1>;

/// Validity window of one request signature, in seconds.
const SIGN_VALIDITY_SECS: i64 = 600;

/// Connection settings for one COS bucket.
#[derive(Debug, Clone)]
pub struct TencentCosConfig {
    /// API secret ID
    pub secret_id: String,
    /// API secret key
    pub secret_key: String,
    /// Bucket name including the APPID suffix, e.g. `notes-1250000000`
    pub bucket: String,
    /// Region, e.g. `ap-guangzhou`
    pub region: String,
    /// Custom endpoint host overriding `<bucket>.cos.<region>.myqcloud.com`
    pub endpoint: Option<String>,
}

/// Tencent COS connector.
///
/// Every request carries an `Authorization` header of the form
/// `q-sign-algorithm=sha1&q-ak=...&q-sign-time=...&q-key-time=...&
/// q-header-list=host&q-url-param-list=...&q-signature=...`, where the
/// signature chain is `SignKey = hmac-sha1(SecretKey, KeyTime)` and
/// `Signature = hmac-sha1(SignKey, StringToSign)`.
pub struct TencentCosConnector {
    http_client: Arc<dyn HttpClient>,
    config: TencentCosConfig,
}

impl TencentCosConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, config: TencentCosConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn host(&self) -> String {
        match &self.config.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!(
                "{}.cos.{}.myqcloud.com",
                self.config.bucket, self.config.region
            ),
        }
    }

    fn encode_key(key: &str) -> String {
        key.split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Build the q-signature authorization header.
    ///
    /// `params` must be the request's query parameters with lower-case keys;
    /// the only signed header is `host`.
    fn sign(&self, method: HttpMethod, path: &str, params: &[(String, String)]) -> String {
        let now = Utc::now().timestamp();
        let key_time = format!("{};{}", now, now + SIGN_VALIDITY_SECS);

        let mut mac = HmacSha1::new_from_slice(self.config.secret_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(key_time.as_bytes());
        let sign_key = hex::encode(mac.finalize().into_bytes());

        let mut sorted = params.to_vec();
        sorted.sort();

        let param_list = sorted
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let param_string = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let header_string = format!("host={}", urlencoding::encode(&self.host()));

        let http_string = format!(
            "{}\n{}\n{}\n{}\n",
            method.as_str().to_lowercase(),
            path,
            param_string,
            header_string
        );

        let http_string_sha1 = hex::encode(Sha1::digest(http_string.as_bytes()));
        let string_to_sign = format!("sha1\n{}\n{}\n", key_time, http_string_sha1);

        let mut mac =
            HmacSha1::new_from_slice(sign_key.as_bytes()).expect("HMAC accepts any key length");
        mac.update(string_to_sign.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        format!(
            "q-sign-algorithm=sha1&q-ak={}&q-sign-time={}&q-key-time={}&q-header-list=host&q-url-param-list={}&q-signature={}",
            self.config.secret_id, key_time, key_time, param_list, signature
        )
    }

    /// Build a signed request for an object operation.
    fn object_request(
        &self,
        method: HttpMethod,
        key: &str,
        content_type: &str,
        body: Option<Bytes>,
    ) -> HttpRequest {
        let path = format!("/{}", key);
        let authorization = self.sign(method, &path, &[]);
        let url = format!("https://{}/{}", self.host(), Self::encode_key(key));

        let mut request = HttpRequest::new(method, url)
            .header("Host", self.host())
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
                TencentCosError::ParseError("Contents entry without Key".to_string())
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
impl ObjectStorage for TencentCosConnector {
    #[instrument(skip(self, data), fields(key = %key, bytes = data.len()))]
    async fn upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let request = self.object_request(HttpMethod::Put, key, content_type, Some(data));
        let response = self.http_client.execute(request).await?;

        if response.is_success() {
            debug!("Object uploaded");
            Ok(())
        } else {
            warn!(status = response.status, "Upload failed");
            Err(TencentCosError::ApiError {
                status_code: response.status,
                message: response.text(),
            }
            .into())
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn download(&self, key: &str) -> Result<Bytes> {
        let request = self.object_request(HttpMethod::Get, key, "", None);
        let response = self.http_client.execute(request).await?;

        match response.status {
            status if (200..300).contains(&status) => Ok(response.body),
            404 => Err(TencentCosError::ObjectNotFound(key.to_string()).into()),
            status => Err(TencentCosError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let request = self.object_request(HttpMethod::Delete, key, "", None);
        let response = self.http_client.execute(request).await?;

        match response.status {
            status if (200..300).contains(&status) => Ok(()),
            404 => Ok(()),
            status => Err(TencentCosError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn exists(&self, key: &str) -> Result<bool> {
        let request = self.object_request(HttpMethod::Head, key, "", None);
        let response = self.http_client.execute(request).await?;

        match response.status {
            status if (200..300).contains(&status) => Ok(true),
            404 => Ok(false),
            status => Err(TencentCosError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn stat(&self, key: &str) -> Result<ObjectStat> {
        let request = self.object_request(HttpMethod::Head, key, "", None);
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
            404 => Err(TencentCosError::ObjectNotFound(key.to_string()).into()),
            status => Err(TencentCosError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(prefix = %prefix, max = max))]
    async fn list(&self, prefix: &str, max: u32) -> Result<Vec<ObjectStat>> {
        let params = vec![
            ("prefix".to_string(), prefix.to_string()),
            ("max-keys".to_string(), max.to_string()),
        ];
        let authorization = self.sign(HttpMethod::Get, "/", &params);

        let url = format!(
            "https://{}/?prefix={}&max-keys={}",
            self.host(),
            urlencoding::encode(prefix),
            max
        );

        let request = HttpRequest::new(HttpMethod::Get, url)
            .header("Host", self.host())
            .header("Authorization", authorization);

        let response = self.http_client.execute(request).await?;

        if !response.is_success() {
            return Err(TencentCosError::ApiError {
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

    fn config() -> TencentCosConfig {
        TencentCosConfig {
            secret_id: "test-id".to_string(),
            secret_key: "test-key".to_string(),
            bucket: "notes-1250000000".to_string(),
            region: "ap-guangzhou".to_string(),
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
    fn test_host() {
        let connector = TencentCosConnector::new(Arc::new(MockHttpClient::new()), config());
        assert_eq!(
            connector.host(),
            "notes-1250000000.cos.ap-guangzhou.myqcloud.com"
        );
    }

    #[test]
    fn test_signature_shape() {
        let connector = TencentCosConnector::new(Arc::new(MockHttpClient::new()), config());
        let auth = connector.sign(HttpMethod::Put, "/sync/a.txt", &[]);

        assert!(auth.starts_with("q-sign-algorithm=sha1&q-ak=test-id&"));
        assert!(auth.contains("q-header-list=host"));
        assert!(auth.contains("q-signature="));
    }

    #[test]
    fn test_signature_includes_sorted_params() {
        let connector = TencentCosConnector::new(Arc::new(MockHttpClient::new()), config());
        let params = vec![
            ("prefix".to_string(), "sync/".to_string()),
            ("max-keys".to_string(), "100".to_string()),
        ];
        let auth = connector.sign(HttpMethod::Get, "/", &params);
        assert!(auth.contains("q-url-param-list=max-keys;prefix"));
    }

    #[tokio::test]
    async fn test_upload_sends_signed_put() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Put);
            assert!(req
                .url
                .starts_with("https://notes-1250000000.cos.ap-guangzhou.myqcloud.com/sync/a.txt"));
            let auth = req.headers.get("Authorization").unwrap();
            assert!(auth.starts_with("q-sign-algorithm=sha1"));
            Ok(response(200, b""))
        });

        let connector = TencentCosConnector::new(Arc::new(mock_http), config());
        connector
            .upload("sync/a.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exists_not_found() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, b"")));

        let connector = TencentCosConnector::new(Arc::new(mock_http), config());
        assert!(!connector.exists("missing.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_stat_not_found() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, b"")));

        let connector = TencentCosConnector::new(Arc::new(mock_http), config());
        assert!(matches!(
            connector.stat("missing.txt").await,
            Err(core_oss::OssError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_parses_xml() {
        let body = br#"<ListBucketResult>
  <Name>notes-1250000000</Name>
  <Contents>
    <Key>sync/a.txt</Key>
    <LastModified>2024-03-01T10:00:00.000Z</LastModified>
    <ETag>"abc"</ETag>
    <Size>17</Size>
  </Contents>
</ListBucketResult>"#;

        let mut mock_http = MockHttpClient::new();
        let body_vec = body.to_vec();
        mock_http
            .expect_execute()
            .times(1)
            .returning(move |_| Ok(response(200, &body_vec)));

        let connector = TencentCosConnector::new(Arc::new(mock_http), config());
        let stats = connector.list("sync/", 100).await.unwrap();

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].key, "sync/a.txt");
        assert_eq!(stats[0].size, 17);
    }

    #[tokio::test]
    async fn test_server_error_surfaces_api_error() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(500, b"InternalError")));

        let connector = TencentCosConnector::new(Arc::new(mock_http), config());
        assert!(matches!(
            connector.download("sync/a.txt").await,
            Err(core_oss::OssError::Api {
                status_code: 500,
                ..
            })
        ));
    }
}
