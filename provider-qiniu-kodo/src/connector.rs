//! Qiniu Kodo connector implementation
//!
//! Implements the `ObjectStorage` trait against Qiniu's upload and
//! management APIs. Uploads go through `upload.qiniup.com` with a scoped
//! upload token; stat/delete/list go through the QBox-signed rs/rsf hosts;
//! downloads go through the bucket's bound download domain with a signed
//! private URL.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use core_oss::{HttpClient, HttpMethod, HttpRequest, ObjectStat, ObjectStorage, Result};

use crate::error::QiniuKodoError;
use crate::types::{put_time_to_unix, ListResponse, PutPolicy, StatResponse};

type HmacSha1 = Hmac<Sha1>;

/// Upload entry point
const UPLOAD_HOST: &str = "https://upload.qiniup.com";

/// Management API host (stat, delete)
const RS_HOST: &str = "https://rs.qiniuapi.com";

/// Listing API host
const RSF_HOST: &str = "https://rsf.qiniuapi.com";

/// Validity of generated upload tokens and download URLs, in seconds.
const TOKEN_TTL_SECS: i64 = 3600;

/// Qiniu's "no such entry" status code.
const STATUS_NO_ENTRY: u16 = 612;

/// Connection settings for one Kodo bucket.
#[derive(Debug, Clone)]
pub struct QiniuKodoConfig {
    /// Access key
    pub access_key: String,
    /// Secret key
    pub secret_key: String,
    /// Bucket name
    pub bucket: String,
    /// Download domain bound to the bucket (Kodo has no default
    /// per-bucket host; this is where object GETs are served from)
    pub download_domain: String,
}

/// Qiniu Kodo connector.
pub struct QiniuKodoConnector {
    http_client: Arc<dyn HttpClient>,
    config: QiniuKodoConfig,
}

impl QiniuKodoConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, config: QiniuKodoConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn hmac_sha1(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha1::new_from_slice(self.config.secret_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// `urlsafe_base64("<bucket>:<key>")`, the entry identifier used by the
    /// management API.
    fn encoded_entry(&self, key: &str) -> String {
        URL_SAFE.encode(format!("{}:{}", self.config.bucket, key))
    }

    /// Scoped upload token: `<ak>:<sign>:<encoded-policy>`.
    fn upload_token(&self, key: &str) -> String {
        let policy = PutPolicy {
            scope: format!("{}:{}", self.config.bucket, key),
            deadline: Utc::now().timestamp() + TOKEN_TTL_SECS,
        };

        let encoded_policy =
            URL_SAFE.encode(serde_json::to_vec(&policy).expect("policy serializes"));
        let sign = URL_SAFE.encode(self.hmac_sha1(encoded_policy.as_bytes()));

        format!("{}:{}:{}", self.config.access_key, sign, encoded_policy)
    }

    /// QBox management token over `<path>?<query>\n`.
    fn management_token(&self, path_and_query: &str) -> String {
        let sign = URL_SAFE.encode(self.hmac_sha1(format!("{}\n", path_and_query).as_bytes()));
        format!("QBox {}:{}", self.config.access_key, sign)
    }

    /// Signed private download URL with an `e`/`token` query pair.
    fn download_url(&self, key: &str) -> String {
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let deadline = Utc::now().timestamp() + TOKEN_TTL_SECS;
        let base = format!(
            "https://{}/{}?e={}",
            self.config.download_domain, encoded_key, deadline
        );

        let token = format!(
            "{}:{}",
            self.config.access_key,
            URL_SAFE.encode(self.hmac_sha1(base.as_bytes()))
        );

        format!("{}&token={}", base, token)
    }

    /// Build the multipart/form-data body of an upload request.
    fn multipart_body(
        boundary: &str,
        token: &str,
        key: &str,
        content_type: &str,
        data: &Bytes,
    ) -> Bytes {
        let mut body = BytesMut::new();

        for (name, value) in [("token", token), ("key", key)] {
            body.put_slice(format!("--{}\r\n", boundary).as_bytes());
            body.put_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            );
            body.put_slice(value.as_bytes());
            body.put_slice(b"\r\n");
        }

        body.put_slice(format!("--{}\r\n", boundary).as_bytes());
        body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                key.rsplit('/').next().unwrap_or(key)
            )
            .as_bytes(),
        );
        body.put_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.put_slice(data);
        body.put_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        body.freeze()
    }

    async fn management_get(&self, host: &str, path_and_query: &str) -> Result<core_oss::HttpResponse> {
        let request = HttpRequest::new(HttpMethod::Get, format!("{}{}", host, path_and_query))
            .header("Authorization", self.management_token(path_and_query));

        self.http_client.execute(request).await
    }
}

#[async_trait]
impl ObjectStorage for QiniuKodoConnector {
    #[instrument(skip(self, data), fields(key = %key, bytes = data.len()))]
    async fn upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let token = self.upload_token(key);

        // Boundary derived from the token signature; it cannot occur in the
        // token or key fields and a collision with file content is
        // vanishingly unlikely.
        let boundary = format!(
            "----FileVaultForm{}",
            hex::encode(Sha1::digest(token.as_bytes()))
        );

        let body = Self::multipart_body(&boundary, &token, key, content_type, &data);

        let request = HttpRequest::new(HttpMethod::Post, UPLOAD_HOST)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(body);

        let response = self.http_client.execute(request).await?;

        if response.is_success() {
            debug!("Object uploaded");
            Ok(())
        } else {
            warn!(status = response.status, "Upload failed");
            Err(QiniuKodoError::ApiError {
                status_code: response.status,
                message: response.text(),
            }
            .into())
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn download(&self, key: &str) -> Result<Bytes> {
        let request = HttpRequest::new(HttpMethod::Get, self.download_url(key));
        let response = self.http_client.execute(request).await?;

        match response.status {
            status if (200..300).contains(&status) => Ok(response.body),
            404 => Err(QiniuKodoError::ObjectNotFound(key.to_string()).into()),
            status => Err(QiniuKodoError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<()> {
        let path = format!("/delete/{}", self.encoded_entry(key));
        let request = HttpRequest::new(HttpMethod::Post, format!("{}{}", RS_HOST, path))
            .header("Authorization", self.management_token(&path))
            .header("Content-Type", "application/x-www-form-urlencoded");

        let response = self.http_client.execute(request).await?;

        match response.status {
            status if (200..300).contains(&status) => Ok(()),
            STATUS_NO_ENTRY | 404 => Ok(()),
            status => Err(QiniuKodoError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.stat(key).await {
            Ok(_) => Ok(true),
            Err(core_oss::OssError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn stat(&self, key: &str) -> Result<ObjectStat> {
        let path = format!("/stat/{}", self.encoded_entry(key));
        let response = self.management_get(RS_HOST, &path).await?;

        match response.status {
            status if (200..300).contains(&status) => {
                let stat: StatResponse = response.json()?;
                Ok(ObjectStat {
                    key: key.to_string(),
                    size: stat.fsize,
                    last_modified: stat.put_time.map(put_time_to_unix),
                    etag: Some(stat.hash),
                    content_type: stat.mime_type,
                })
            }
            STATUS_NO_ENTRY | 404 => Err(QiniuKodoError::ObjectNotFound(key.to_string()).into()),
            status => Err(QiniuKodoError::ApiError {
                status_code: status,
                message: response.text(),
            }
            .into()),
        }
    }

    #[instrument(skip(self), fields(prefix = %prefix, max = max))]
    async fn list(&self, prefix: &str, max: u32) -> Result<Vec<ObjectStat>> {
        let path = format!(
            "/list?bucket={}&prefix={}&limit={}",
            urlencoding::encode(&self.config.bucket),
            urlencoding::encode(prefix),
            max
        );
        let response = self.management_get(RSF_HOST, &path).await?;

        if !response.is_success() {
            return Err(QiniuKodoError::ApiError {
                status_code: response.status,
                message: response.text(),
            }
            .into());
        }

        let listing: ListResponse = response.json()?;
        let stats = listing
            .items
            .into_iter()
            .map(|item| ObjectStat {
                key: item.key,
                size: item.fsize,
                last_modified: item.put_time.map(put_time_to_unix),
                etag: item.hash,
                content_type: item.mime_type,
            })
            .collect::<Vec<_>>();

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

    fn config() -> QiniuKodoConfig {
        QiniuKodoConfig {
            access_key: "test-ak".to_string(),
            secret_key: "test-sk".to_string(),
            bucket: "notes".to_string(),
            download_domain: "cdn.example.com".to_string(),
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
    fn test_encoded_entry() {
        let connector = QiniuKodoConnector::new(Arc::new(MockHttpClient::new()), config());
        let entry = connector.encoded_entry("sync/a.txt");
        let decoded = URL_SAFE.decode(entry).unwrap();
        assert_eq!(decoded, b"notes:sync/a.txt");
    }

    #[test]
    fn test_upload_token_shape() {
        let connector = QiniuKodoConnector::new(Arc::new(MockHttpClient::new()), config());
        let token = connector.upload_token("sync/a.txt");

        let parts: Vec<&str> = token.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "test-ak");

        let policy: PutPolicy =
            serde_json::from_slice(&URL_SAFE.decode(parts[2]).unwrap()).unwrap();
        assert_eq!(policy.scope, "notes:sync/a.txt");
        assert!(policy.deadline > Utc::now().timestamp());
    }

    #[test]
    fn test_download_url_is_signed() {
        let connector = QiniuKodoConnector::new(Arc::new(MockHttpClient::new()), config());
        let url = connector.download_url("sync/a b.txt");

        assert!(url.starts_with("https://cdn.example.com/sync/a%20b.txt?e="));
        assert!(url.contains("&token=test-ak:"));
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = QiniuKodoConnector::multipart_body(
            "----b",
            "tok",
            "sync/a.txt",
            "text/plain",
            &Bytes::from_static(b"hello"),
        );
        let text = String::from_utf8_lossy(&body);

        assert!(text.contains("name=\"token\"\r\n\r\ntok"));
        assert!(text.contains("name=\"key\"\r\n\r\nsync/a.txt"));
        assert!(text.contains("filename=\"a.txt\""));
        assert!(text.contains("Content-Type: text/plain"));
        assert!(text.ends_with("------b--\r\n"));
    }

    #[tokio::test]
    async fn test_upload_posts_multipart() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Post);
            assert_eq!(req.url, UPLOAD_HOST);
            let content_type = req.headers.get("Content-Type").unwrap();
            assert!(content_type.starts_with("multipart/form-data; boundary="));
            assert!(req.body.is_some());
            Ok(response(200, br#"{"key":"sync/a.txt","hash":"Fh8x"}"#))
        });

        let connector = QiniuKodoConnector::new(Arc::new(mock_http), config());
        connector
            .upload("sync/a.txt", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stat_parses_json() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert!(req.url.starts_with(RS_HOST));
            assert!(req
                .headers
                .get("Authorization")
                .unwrap()
                .starts_with("QBox test-ak:"));
            Ok(response(
                200,
                br#"{"fsize": 5, "hash": "Fh8x", "mimeType": "text/plain", "putTime": 17040672000000000}"#,
            ))
        });

        let connector = QiniuKodoConnector::new(Arc::new(mock_http), config());
        let stat = connector.stat("sync/a.txt").await.unwrap();

        assert_eq!(stat.size, 5);
        assert_eq!(stat.etag.as_deref(), Some("Fh8x"));
        assert_eq!(stat.last_modified, Some(1_704_067_200));
    }

    #[tokio::test]
    async fn test_stat_612_is_not_found() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(612, br#"{"error":"no such file or directory"}"#)));

        let connector = QiniuKodoConnector::new(Arc::new(mock_http), config());
        assert!(!connector.exists("missing.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_parses_json() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert!(req.url.starts_with(RSF_HOST));
            assert!(req.url.contains("bucket=notes"));
            assert!(req.url.contains("limit=50"));
            Ok(response(
                200,
                br#"{"items":[{"key":"sync/a.txt","fsize":5,"hash":"Fh8x","mimeType":"text/plain","putTime":17040672000000000}]}"#,
            ))
        });

        let connector = QiniuKodoConnector::new(Arc::new(mock_http), config());
        let stats = connector.list("sync/", 50).await.unwrap();

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].key, "sync/a.txt");
        assert_eq!(stats[0].size, 5);
    }

    #[tokio::test]
    async fn test_delete_missing_entry_is_ok() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(612, b"")));

        let connector = QiniuKodoConnector::new(Arc::new(mock_http), config());
        connector.delete("missing.txt").await.unwrap();
    }
}
