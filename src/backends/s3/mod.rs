//! Upload of packaged dumps to an S3 bucket.

pub mod sigv4;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use derive_more::{Display, Error, From};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};

use super::Upload;
use sigv4::{sha256_hex, uri_encode, Signer};

pub const CONTENT_TYPE: &str = "application/zip";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
pub const DEFAULT_SERVER_SIDE_ENCRYPTION: &str = "AES256";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Display, Error, From)]
/// Errors on uploading to S3.
pub enum S3Error {
    /// The request couldn't be sent or answered.
    #[display("S3 request failed: {_0}")]
    Http(reqwest::Error),
    /// S3 answered with a non-success status.
    #[display("S3 rejected the upload with {status}: {body}")]
    #[from(ignore)]
    Status {
        status: StatusCode,
        body: String,
    },
    /// The custom endpoint isn't a usable URL.
    #[display("Invalid S3 endpoint '{endpoint}': {reason}")]
    #[from(ignore)]
    Endpoint {
        endpoint: String,
        reason: String,
    },
}

/// Where and how objects are stored.
#[derive(Debug, Clone)]
pub struct S3Target {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (e.g. MinIO). Switches to path-style addressing.
    pub endpoint: Option<String>,
    pub storage_class: String,
    pub server_side_encryption: String,
}

impl S3Target {
    /// URL, `host` header and canonical path of `key`.
    ///
    /// An endpoint without a scheme is reached via https. A path on the
    /// endpoint is kept in front of the bucket.
    fn locate(&self, key: &str) -> Result<(String, String, String), S3Error> {
        let key = uri_encode(key.trim_start_matches('/'), false);
        let Some(endpoint) = &self.endpoint else {
            let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
            let path = format!("/{key}");
            return Ok((format!("https://{host}{path}"), host, path));
        };

        let invalid = |reason: String| S3Error::Endpoint {
            endpoint: endpoint.clone(),
            reason,
        };
        let url = if endpoint.contains("://") {
            Url::parse(endpoint)
        } else {
            Url::parse(&format!("https://{endpoint}"))
        }
        .map_err(|e| invalid(e.to_string()))?;
        let Some(host) = url.host_str() else {
            return Err(invalid("no host".to_string()));
        };
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let path = format!(
            "{}/{}/{key}",
            url.path().trim_end_matches('/'),
            uri_encode(&self.bucket, true)
        );
        Ok((format!("{}://{host}{path}", url.scheme()), host, path))
    }
}

/// Blocking S3 client able to put single objects.
#[derive(Debug, Clone)]
pub struct S3Uploader {
    target: S3Target,
    signer: Signer,
    client: Client,
}

impl S3Uploader {
    pub fn new(
        target: S3Target,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Result<Self, S3Error> {
        // a broken endpoint fails here instead of on the first upload
        target.locate("")?;
        let client = Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
        let signer = Signer::new(access_key_id, secret_access_key, target.region.clone());

        Ok(Self {
            target,
            signer,
            client,
        })
    }

    pub fn target(&self) -> &S3Target {
        &self.target
    }

    /// Headers of a `PUT` of `body` including the signature.
    fn signed_headers(&self, host: String, path: &str, body: &[u8]) -> BTreeMap<String, String> {
        let now = Utc::now();
        let payload_hash = sha256_hex(body);

        let mut headers = BTreeMap::from([
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), now.format("%Y%m%dT%H%M%SZ").to_string()),
            (
                "x-amz-server-side-encryption".to_string(),
                self.target.server_side_encryption.clone(),
            ),
            (
                "x-amz-storage-class".to_string(),
                self.target.storage_class.clone(),
            ),
        ]);

        let authorization = self
            .signer
            .authorization("PUT", path, &headers, &payload_hash, now);
        headers.insert("authorization".to_string(), authorization);
        headers
    }
}

impl Upload for S3Uploader {
    type Error = S3Error;

    fn upload(&self, key: &str, body: Vec<u8>) -> Result<(), Self::Error> {
        let (url, host, path) = self.target.locate(key)?;
        log::info!(
            target: "upload::s3",
            "Uploading {} bytes to s3://{}/{key} ({})",
            body.len(),
            self.target.bucket,
            self.target.storage_class,
        );

        let headers = self.signed_headers(host, &path, &body);
        let mut request = self.client.put(&url);
        for (name, value) in &headers {
            // reqwest derives host from the url
            if name != "host" {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.body(body).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(S3Error::Status { status, body });
        }

        log::debug!(target: "upload::s3", "Upload to {url} answered with {status}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(endpoint: Option<&str>) -> S3Target {
        S3Target {
            bucket: "db-backups".into(),
            region: "eu-central-1".into(),
            endpoint: endpoint.map(String::from),
            storage_class: "STANDARD_IA".into(),
            server_side_encryption: DEFAULT_SERVER_SIDE_ENCRYPTION.into(),
        }
    }

    #[test]
    fn virtual_hosted_location() {
        let (url, host, path) = target(None).locate("mongo/6-3-2024.zip").unwrap();
        assert_eq!(host, "db-backups.s3.eu-central-1.amazonaws.com");
        assert_eq!(path, "/mongo/6-3-2024.zip");
        assert_eq!(
            url,
            "https://db-backups.s3.eu-central-1.amazonaws.com/mongo/6-3-2024.zip"
        );
    }

    #[test]
    fn path_style_location_for_custom_endpoint() {
        let (url, host, path) = target(Some("http://localhost:9000/"))
            .locate("/6-3-2024.zip")
            .unwrap();
        assert_eq!(host, "localhost:9000");
        assert_eq!(path, "/db-backups/6-3-2024.zip");
        assert_eq!(url, "http://localhost:9000/db-backups/6-3-2024.zip");
    }

    #[test]
    fn endpoint_without_scheme_uses_https() {
        let (url, host, path) = target(Some("localhost:9000"))
            .locate("6-3-2024.zip")
            .unwrap();
        assert_eq!(host, "localhost:9000");
        assert_eq!(path, "/db-backups/6-3-2024.zip");
        assert_eq!(url, "https://localhost:9000/db-backups/6-3-2024.zip");
    }

    #[test]
    fn endpoint_path_precedes_bucket() {
        let (url, host, path) = target(Some("https://minio.example/s3/"))
            .locate("mongo/6-3-2024.zip")
            .unwrap();
        assert_eq!(host, "minio.example");
        assert_eq!(path, "/s3/db-backups/mongo/6-3-2024.zip");
        assert_eq!(url, "https://minio.example/s3/db-backups/mongo/6-3-2024.zip");
    }

    #[test]
    fn broken_endpoint_is_rejected_up_front() {
        let err = S3Uploader::new(target(Some("http://")), "AKID", "SECRET").unwrap_err();
        assert!(matches!(err, S3Error::Endpoint { .. }), "{err}");
    }

    #[test]
    fn upload_headers_carry_metadata() {
        let uploader = S3Uploader::new(target(None), "AKID", "SECRET").unwrap();
        let headers = uploader.signed_headers("h".into(), "/k.zip", b"zip");

        assert_eq!(headers["content-type"], "application/zip");
        assert_eq!(headers["x-amz-server-side-encryption"], "AES256");
        assert_eq!(headers["x-amz-storage-class"], "STANDARD_IA");
        assert_eq!(headers["x-amz-content-sha256"], sha256_hex(b"zip"));
        assert!(headers["authorization"].starts_with("AWS4-HMAC-SHA256 Credential=AKID/"));
        assert!(headers["authorization"].contains(
            "SignedHeaders=content-type;host;x-amz-content-sha256;x-amz-date;\
             x-amz-server-side-encryption;x-amz-storage-class,"
        ));
    }
}
