//! Typed S3 operations
//!
//! Every operation builds a `(method, url, headers)` triple and hands it
//! to the signing proxy; the proxy owns credential fetching, header
//! enrichment, and signature computation. Object operations use
//! virtual-hosted URLs (`<bucket>.s3.<region>.amazonaws.com`); the service
//! root for ListBuckets is path style. An endpoint override switches
//! object URLs to path style for non-AWS endpoints and test servers.

use bytes::Bytes;
use futures::StreamExt;
use http_body_util::BodyStream;
use hyper::{HeaderMap, Method, StatusCode};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::auth::canonical;
use crate::auth::CredentialsProvider;
use crate::config::Profile;
use crate::error::{Error, Result};
use crate::proxy::SigningProxy;
use crate::s3::types::{
    ByteRange, CompletedPart, GetObjectOutput, ListBucketsCallback, MultipartConfig,
};
use crate::s3::xml;
use crate::s3::MultipartStream;

/// S3 client; all requests flow through the signing proxy.
///
/// Clone is cheap - the proxy's HTTP client is shared.
#[derive(Clone)]
pub struct S3Client {
    proxy: SigningProxy,
    region: String,
    endpoint: Option<String>,
}

impl S3Client {
    pub fn new(provider: Arc<dyn CredentialsProvider>, region: &str) -> Self {
        Self {
            proxy: SigningProxy::new(provider, region),
            region: region.to_string(),
            endpoint: None,
        }
    }

    /// Point the client at a non-AWS endpoint (MinIO, the in-memory
    /// server). Object URLs become path style.
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        self
    }

    /// Build a client from a configuration profile.
    pub fn from_profile(profile: &Profile) -> Self {
        let provider = Arc::new(crate::auth::StaticCredentials::new(
            profile.access_key.clone(),
            profile.secret_key.clone(),
            profile.session_token.clone(),
        ));
        let mut client = Self::new(provider, &profile.region);
        if let Some(endpoint) = &profile.endpoint {
            client = client.with_endpoint(endpoint.clone());
        }
        client
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Service root URL, path style. Used only by ListBuckets.
    fn service_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/", endpoint),
            None => format!("https://s3.{}.amazonaws.com/", self.region),
        }
    }

    /// Object URL: virtual-hosted against AWS, path style against an
    /// endpoint override. The key is percent-encoded with `/` preserved.
    fn object_url(&self, bucket: &str, key: &str) -> String {
        let encoded_key = canonical::uri_encode(key, false);
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint, bucket, encoded_key),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                bucket, self.region, encoded_key
            ),
        }
    }

    /// Turn a non-2xx response into an error, reading `<Error>` bodies.
    fn error_from_response(status: StatusCode, body: &[u8]) -> Error {
        match xml::parse_error_doc(body) {
            Some((code, message)) => Error::S3 {
                code,
                message,
                status,
            },
            None => Error::S3 {
                code: "Unknown".to_string(),
                message: String::from_utf8_lossy(body).into_owned(),
                status,
            },
        }
    }

    /// List all buckets, yielding each name through the callback followed
    /// by a single `end()`.
    pub async fn list_buckets(&self, callback: &mut dyn ListBucketsCallback) -> Result<()> {
        let url = self.service_url();

        let (status, _headers, body) = self
            .proxy
            .request_collected(Method::GET, &url, BTreeMap::new(), Bytes::new())
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }

        let names = xml::all_texts(
            &body,
            &["ListAllMyBucketsResult", "Buckets", "Bucket", "Name"],
        )?;
        for name in &names {
            callback.next(name);
        }
        callback.end();
        Ok(())
    }

    /// HEAD an object, returning the response headers verbatim.
    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<HeaderMap> {
        let url = self.object_url(bucket, key);

        let (status, headers, body) = self
            .proxy
            .request_collected(Method::HEAD, &url, BTreeMap::new(), Bytes::new())
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }

        Ok(headers)
    }

    /// GET an object, pumping the body into the caller's sink.
    ///
    /// An optional inclusive byte range is sent as `range: first-last`.
    /// The response's Content-Length comes back in the output.
    pub async fn get_object<W>(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        sink: &mut W,
    ) -> Result<GetObjectOutput>
    where
        W: AsyncWrite + Unpin,
    {
        let url = self.object_url(bucket, key);

        let mut headers = BTreeMap::new();
        if let Some(range) = range {
            headers.insert("range".to_string(), range.header_value());
        }

        let response = self
            .proxy
            .request(Method::GET, &url, headers, Bytes::new())
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = http_body_util::BodyExt::collect(response.into_body())
                .await
                .map_err(|e| Error::Http(format!("body error: {e}")))?
                .to_bytes();
            return Err(Self::error_from_response(status, &body));
        }

        let length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let mut body = BodyStream::new(response.into_body());
        while let Some(frame) = body.next().await {
            let frame = frame.map_err(|e| Error::Http(format!("body error: {e}")))?;
            if let Some(chunk) = frame.data_ref() {
                sink.write_all(chunk).await?;
            }
        }
        sink.flush().await?;

        Ok(GetObjectOutput { length })
    }

    /// PUT an object; the content length is the buffer length.
    pub async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<()> {
        let url = self.object_url(bucket, key);

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/octet-stream".to_string(),
        );
        headers.insert("content-length".to_string(), data.len().to_string());

        let (status, _resp_headers, body) = self
            .proxy
            .request_collected(Method::PUT, &url, headers, data)
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }

        Ok(())
    }

    /// DELETE an object.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let url = self.object_url(bucket, key);

        let (status, _headers, body) = self
            .proxy
            .request_collected(Method::DELETE, &url, BTreeMap::new(), Bytes::new())
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }

        Ok(())
    }

    /// Initiate a multipart upload; returns the upload id.
    pub async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String> {
        let url = format!("{}?uploads", self.object_url(bucket, key));

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/octet-stream".to_string(),
        );

        let (status, _resp_headers, body) = self
            .proxy
            .request_collected(Method::POST, &url, headers, Bytes::new())
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }

        xml::first_text(&body, &["InitiateMultipartUploadResult", "UploadId"])
    }

    /// Upload one part. Part numbers are 1-based; every part except the
    /// last must meet the S3 minimum size. Returns the ETag response
    /// header verbatim, quotes included.
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String> {
        let base_url = self.object_url(bucket, key);
        let mut url = String::with_capacity(base_url.len() + 64);
        url.push_str(&base_url);
        url.push_str("?partNumber=");
        let _ = write!(url, "{}", part_number);
        url.push_str("&uploadId=");
        url.push_str(&canonical::uri_encode(upload_id, true));

        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), data.len().to_string());

        let (status, resp_headers, body) = self
            .proxy
            .request_collected(Method::PUT, &url, headers, data)
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }

        let etag = resp_headers
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Http("missing ETag header on part upload".into()))?;

        Ok(etag)
    }

    /// Complete a multipart upload from the accumulated parts, which must
    /// already be in ascending part-number order. Returns the final ETag.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let base_url = self.object_url(bucket, key);
        let mut url = String::with_capacity(base_url.len() + 64);
        url.push_str(&base_url);
        url.push_str("?uploadId=");
        url.push_str(&canonical::uri_encode(upload_id, true));

        // ETags go out exactly as the part uploads returned them.
        let mut xml_body = String::with_capacity(parts.len() * 100 + 64);
        xml_body.push_str("<CompleteMultipartUpload>");
        for part in parts {
            xml_body.push_str("<Part><PartNumber>");
            let _ = write!(xml_body, "{}", part.part_number);
            xml_body.push_str("</PartNumber><ETag>");
            xml_body.push_str(&part.etag);
            xml_body.push_str("</ETag></Part>");
        }
        xml_body.push_str("</CompleteMultipartUpload>");

        let xml_bytes = Bytes::from(xml_body.into_bytes());

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-length".to_string(), xml_bytes.len().to_string());

        let (status, _resp_headers, body) = self
            .proxy
            .request_collected(Method::POST, &url, headers, xml_bytes)
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }

        // A 200 body can still be an error document for this operation.
        if let Some((code, message)) = xml::parse_error_doc(&body) {
            return Err(Error::S3 {
                code,
                message,
                status,
            });
        }

        xml::first_text(&body, &["CompleteMultipartUploadResult", "ETag"])
    }

    /// Abort a multipart upload, deleting any parts uploaded so far.
    ///
    /// The multipart stream never calls this on its own; cleaning up a
    /// failed upload is the caller's decision.
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        let base_url = self.object_url(bucket, key);
        let mut url = String::with_capacity(base_url.len() + 64);
        url.push_str(&base_url);
        url.push_str("?uploadId=");
        url.push_str(&canonical::uri_encode(upload_id, true));

        let (status, _headers, body) = self
            .proxy
            .request_collected(Method::DELETE, &url, BTreeMap::new(), Bytes::new())
            .await?;

        if !status.is_success() {
            return Err(Self::error_from_response(status, &body));
        }

        Ok(())
    }

    /// Initiate a multipart upload and wrap it in a byte-sink stream.
    pub async fn start_multipart(
        &self,
        bucket: &str,
        key: &str,
        config: MultipartConfig,
    ) -> Result<MultipartStream> {
        let upload_id = self.create_multipart_upload(bucket, key).await?;
        Ok(MultipartStream::new(
            self.clone(),
            bucket.to_string(),
            key.to_string(),
            upload_id,
            config,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;

    fn client() -> S3Client {
        let provider = Arc::new(StaticCredentials::new("k".into(), "s".into(), None));
        S3Client::new(provider, "us-east-1")
    }

    #[test]
    fn test_virtual_hosted_object_url() {
        let c = client();
        assert_eq!(
            c.object_url("data", "path/to/file.txt"),
            "https://data.s3.us-east-1.amazonaws.com/path/to/file.txt"
        );
    }

    #[test]
    fn test_object_url_encodes_key() {
        let c = client();
        assert_eq!(
            c.object_url("data", "with space/x"),
            "https://data.s3.us-east-1.amazonaws.com/with%20space/x"
        );
    }

    #[test]
    fn test_path_style_with_endpoint_override() {
        let c = client().with_endpoint("http://127.0.0.1:9000/".into());
        assert_eq!(c.object_url("data", "k"), "http://127.0.0.1:9000/data/k");
        assert_eq!(c.service_url(), "http://127.0.0.1:9000/");
    }

    #[test]
    fn test_service_url_is_path_style() {
        assert_eq!(client().service_url(), "https://s3.us-east-1.amazonaws.com/");
    }

    #[test]
    fn test_error_from_response_parses_error_doc() {
        let body = b"<Error><Code>NoSuchKey</Code><Message>gone</Message></Error>";
        let err = S3Client::error_from_response(StatusCode::NOT_FOUND, body);
        match err {
            Error::S3 { code, message, status } => {
                assert_eq!(code, "NoSuchKey");
                assert_eq!(message, "gone");
                assert_eq!(status, StatusCode::NOT_FOUND);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_from_response_non_xml_body() {
        let err = S3Client::error_from_response(StatusCode::SERVICE_UNAVAILABLE, b"slow down");
        match err {
            Error::S3 { code, message, .. } => {
                assert_eq!(code, "Unknown");
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
